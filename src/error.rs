// src/error.rs
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the streaming engine. None of them are retried: any
/// failure mid-run invalidates the whole output product.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad band index, line range or buffer shape. Programmer error.
    #[error("precondition violated: {0}")]
    PreconditionViolation(String),

    #[error("I/O error on band {band}, lines {start_line}..{end_line}: {source}")]
    Io {
        band: usize,
        start_line: usize,
        end_line: usize,
        #[source]
        source: std::io::Error,
    },

    /// Operating on a closed/unopened source or sink, or freeing an open one.
    #[error("resource state error: {0}")]
    ResourceState(String),

    #[error("invalid raster descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("band file {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(String),
}

#[cfg(feature = "gdal")]
impl From<gdal::errors::GdalError> for Error {
    fn from(e: gdal::errors::GdalError) -> Self {
        Error::Gdal(e.to_string())
    }
}

impl Error {
    pub(crate) fn precondition(msg: impl Into<String>) -> Self {
        Error::PreconditionViolation(msg.into())
    }

    pub(crate) fn resource_state(msg: impl Into<String>) -> Self {
        Error::ResourceState(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
