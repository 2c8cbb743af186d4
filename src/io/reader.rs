// src/io/reader.rs
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::raster::{RasterDescriptor, Window};

/// Windowed access to the bands of one open input raster.
pub trait RasterSource: Send + Sync {
    fn descriptor(&self) -> &RasterDescriptor;

    /// Read `line_count` full lines of `band` starting at `start_line` into
    /// `window`, setting its height. Holds no cursor between calls.
    fn read_into(
        &self,
        band: usize,
        start_line: usize,
        line_count: usize,
        window: &mut Window,
    ) -> Result<()>;

    /// Release the band handles. Reads after close are rejected.
    fn close(&mut self) -> Result<()>;

    fn read_window(&self, band: usize, start_line: usize, line_count: usize) -> Result<Window> {
        let mut window = Window::new(line_count, self.descriptor().samples());
        self.read_into(band, start_line, line_count, &mut window)?;
        Ok(window)
    }
}

/// Source over raw band planes of little-endian `i16`, one handle per band.
pub struct RawSource<H> {
    descriptor: RasterDescriptor,
    bands: Vec<Mutex<H>>,
    open: bool,
}

impl<H: Read + Seek + Send> RawSource<H> {
    pub fn open(descriptor: RasterDescriptor, handles: Vec<H>) -> Result<Self> {
        if handles.len() != descriptor.bands() {
            return Err(Error::precondition(format!(
                "descriptor declares {} bands but {} handles were supplied",
                descriptor.bands(),
                handles.len()
            )));
        }

        debug!(
            lines = descriptor.lines(),
            samples = descriptor.samples(),
            bands = descriptor.bands(),
            "opened raw source"
        );

        Ok(Self {
            descriptor,
            bands: handles.into_iter().map(Mutex::new).collect(),
            open: true,
        })
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

impl RawSource<File> {
    /// Open one band file per path. Files shorter than a full band plane
    /// are rejected before any window is read.
    pub fn open_files<P: AsRef<Path>>(descriptor: RasterDescriptor, paths: &[P]) -> Result<Self> {
        let handles = paths
            .iter()
            .map(|p| {
                let path = p.as_ref();
                let file_err = |source| Error::File {
                    path: path.to_path_buf(),
                    source,
                };
                let file = File::open(path).map_err(file_err)?;
                let len = file.metadata().map_err(file_err)?.len();
                if len < descriptor.band_bytes() {
                    return Err(Error::InvalidDescriptor(format!(
                        "{} holds {len} bytes, a {}x{} band needs {}",
                        path.display(),
                        descriptor.lines(),
                        descriptor.samples(),
                        descriptor.band_bytes()
                    )));
                }
                Ok(file)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::open(descriptor, handles)
    }
}

impl<H: Read + Seek + Send> RasterSource for RawSource<H> {
    fn descriptor(&self) -> &RasterDescriptor {
        &self.descriptor
    }

    fn read_into(
        &self,
        band: usize,
        start_line: usize,
        line_count: usize,
        window: &mut Window,
    ) -> Result<()> {
        if !self.open {
            return Err(Error::resource_state("raster source is closed"));
        }
        self.descriptor.check_range(band, start_line, line_count)?;

        let samples = self.descriptor.samples();
        if window.samples() != samples {
            return Err(Error::precondition(format!(
                "window is {} samples wide, raster is {samples}",
                window.samples()
            )));
        }
        window.set_lines(line_count)?;

        let io_err = |source| Error::Io {
            band,
            start_line,
            end_line: start_line + line_count,
            source,
        };

        let offset = (start_line * samples * std::mem::size_of::<i16>()) as u64;
        let mut bytes = vec![0u8; line_count * samples * std::mem::size_of::<i16>()];
        {
            let mut handle = self.bands[band].lock();
            handle.seek(SeekFrom::Start(offset)).map_err(io_err)?;
            handle.read_exact(&mut bytes).map_err(io_err)?;
        }

        LittleEndian::read_i16_into(&bytes, window.as_mut_slice());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.open {
            return Err(Error::resource_state(
                "raster source is not open, so it cannot be closed",
            ));
        }
        self.bands.clear();
        self.open = false;
        Ok(())
    }
}
