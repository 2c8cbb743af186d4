// src/io/writer.rs
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::raster::{RasterDescriptor, Window};

/// Windowed writes into the bands of one open output raster.
///
/// Output is not durable until [`RasterSink::close`] succeeds.
pub trait RasterSink: Send + Sync {
    fn descriptor(&self) -> &RasterDescriptor;

    /// Write whole lines of `band` starting at `start_line`. The line count
    /// is `data.len() / samples`. Offsets are absolute, order is free.
    fn write_lines(&self, band: usize, start_line: usize, data: &[i16]) -> Result<()>;

    /// Flush every band. Fails if the sink is not open or a write failed.
    fn close(&mut self) -> Result<()>;

    /// Release the sink without making it durable.
    fn abort(&mut self);

    fn write_window(&self, band: usize, start_line: usize, window: &Window) -> Result<()> {
        self.write_lines(band, start_line, window.as_slice())
    }
}

/// Remembers that a write failed, so the sink refuses a durable close.
#[derive(Debug, Default)]
pub(crate) struct WriteFailures(AtomicBool);

impl WriteFailures {
    pub(crate) fn track<T>(&self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.0.store(true, Ordering::SeqCst);
        }
        result
    }

    pub(crate) fn any(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Open,
    Closed,
    Aborted,
}

/// Sink writing raw little-endian `i16` band planes, one handle per band.
pub struct RawSink<H: Write + Seek + Send> {
    descriptor: RasterDescriptor,
    bands: Vec<Mutex<H>>,
    state: SinkState,
    failures: WriteFailures,
}

impl<H: Write + Seek + Send> RawSink<H> {
    pub fn open(descriptor: RasterDescriptor, handles: Vec<H>) -> Result<Self> {
        if handles.len() != descriptor.bands() {
            return Err(Error::precondition(format!(
                "descriptor declares {} output bands but {} handles were supplied",
                descriptor.bands(),
                handles.len()
            )));
        }

        debug!(
            lines = descriptor.lines(),
            samples = descriptor.samples(),
            bands = descriptor.bands(),
            "opened raw sink"
        );

        Ok(Self {
            descriptor,
            bands: handles.into_iter().map(Mutex::new).collect(),
            state: SinkState::Open,
            failures: WriteFailures::default(),
        })
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    /// Tear down the sink and hand back its handles. Only legal once the
    /// sink was closed or aborted.
    pub fn free(mut self) -> Result<Vec<H>> {
        if self.state == SinkState::Open {
            return Err(Error::resource_state(
                "raster sink is still open, so it cannot be freed",
            ));
        }
        let bands = std::mem::take(&mut self.bands);
        Ok(bands.into_iter().map(Mutex::into_inner).collect())
    }
}

impl RawSink<File> {
    /// Create (truncating) one band file per path. If any file cannot be
    /// created, the ones already created are removed again.
    pub fn create_files<P: AsRef<Path>>(descriptor: RasterDescriptor, paths: &[P]) -> Result<Self> {
        if paths.len() != descriptor.bands() {
            return Err(Error::precondition(format!(
                "descriptor declares {} output bands but {} paths were supplied",
                descriptor.bands(),
                paths.len()
            )));
        }

        let mut handles = Vec::with_capacity(paths.len());
        for (created, p) in paths.iter().enumerate() {
            let opened = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(p.as_ref());
            match opened {
                Ok(file) => handles.push(file),
                Err(source) => {
                    drop(handles);
                    for stale in &paths[..created] {
                        if let Err(e) = fs::remove_file(stale.as_ref()) {
                            warn!("could not remove {}: {e}", stale.as_ref().display());
                        }
                    }
                    return Err(Error::File {
                        path: p.as_ref().to_path_buf(),
                        source,
                    });
                }
            }
        }
        Self::open(descriptor, handles)
    }
}

impl<H: Write + Seek + Send> RasterSink for RawSink<H> {
    fn descriptor(&self) -> &RasterDescriptor {
        &self.descriptor
    }

    fn write_lines(&self, band: usize, start_line: usize, data: &[i16]) -> Result<()> {
        if self.state != SinkState::Open {
            return Err(Error::resource_state(format!(
                "raster sink is {:?}, cannot write band {band}",
                self.state
            )));
        }

        let samples = self.descriptor.samples();
        if data.len() % samples != 0 {
            return Err(Error::precondition(format!(
                "{} values do not form whole lines of {samples} samples",
                data.len()
            )));
        }
        let line_count = data.len() / samples;
        self.descriptor.check_range(band, start_line, line_count)?;

        let mut bytes = vec![0u8; data.len() * std::mem::size_of::<i16>()];
        LittleEndian::write_i16_into(data, &mut bytes);

        let offset = (start_line * samples * std::mem::size_of::<i16>()) as u64;
        let result = {
            let mut handle = self.bands[band].lock();
            handle
                .seek(SeekFrom::Start(offset))
                .and_then(|_| handle.write_all(&bytes))
        };

        self.failures.track(result.map_err(|source| Error::Io {
            band,
            start_line,
            end_line: start_line + line_count,
            source,
        }))
    }

    fn close(&mut self) -> Result<()> {
        if self.state != SinkState::Open {
            return Err(Error::resource_state(format!(
                "raster sink is {:?}, so it cannot be closed",
                self.state
            )));
        }
        if self.failures.any() {
            self.abort();
            return Err(Error::resource_state(
                "raster sink had a failed write and cannot be closed as durable",
            ));
        }

        for (band, handle) in self.bands.iter().enumerate() {
            let flushed = handle.lock().flush().map_err(|source| Error::Io {
                band,
                start_line: 0,
                end_line: self.descriptor.lines(),
                source,
            });
            self.failures.track(flushed)?;
        }

        self.state = SinkState::Closed;
        Ok(())
    }

    fn abort(&mut self) {
        if self.state == SinkState::Open {
            warn!("aborting raster sink, output is incomplete");
            self.state = SinkState::Aborted;
        }
    }
}

impl<H: Write + Seek + Send> Drop for RawSink<H> {
    fn drop(&mut self) {
        if self.state == SinkState::Open {
            error!(
                bands = self.bands.len(),
                "raster sink dropped while still open, output was never closed"
            );
        }
    }
}
