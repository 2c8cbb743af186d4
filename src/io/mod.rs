// src/io/mod.rs
pub mod reader;
pub mod writer;
#[cfg(feature = "gdal")]
pub mod gdal_io;

pub use reader::{RasterSource, RawSource};
pub use writer::{RasterSink, RawSink, SinkState};
#[cfg(feature = "gdal")]
pub use gdal_io::{GdalSink, GdalSource};
