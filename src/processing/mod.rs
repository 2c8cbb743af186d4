// src/processing/mod.rs
pub mod driver;
pub mod indices;
pub mod request;

// Re-export main components
pub use driver::{DriverState, Progress, RunSummary, StreamConfig, StreamDriver};
pub use request::{build_requests, BandRoles, IndexRequest, Instrument, SpectralIndex};
