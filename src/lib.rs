// src/lib.rs
pub mod batch;
pub mod cli;
pub mod error;
pub mod io;
pub mod logger;
pub mod processing;
pub mod raster;
pub mod utils;

pub use error::{Error, Result};
pub use raster::{PixelState, RasterDescriptor, Window, FILL_OUT, SATURATE_OUT};

// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
