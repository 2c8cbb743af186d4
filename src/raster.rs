// src/raster.rs
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Sentinel written for pixels where any input band was fill.
pub const FILL_OUT: i16 = -9999;
/// Sentinel written for pixels where any input band was saturated.
pub const SATURATE_OUT: i16 = 20000;
/// Multiplier between a real-valued index and its stored integer.
pub const FLOAT_TO_INT: f64 = 10000.0;
/// Scale factor advertised for index products.
pub const OUTPUT_SCALE: f64 = 0.0001;
/// Valid range of a quantized index value.
pub const OUTPUT_VALID_RANGE: (i16, i16) = (-10000, 10000);

/// Geometry and sample encoding of a multi-band raster. Fixed at open time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RasterDescriptor {
    lines: usize,
    samples: usize,
    bands: usize,
    fill: i16,
    saturate: i16,
    scale: f64,
}

impl RasterDescriptor {
    pub fn new(
        lines: usize,
        samples: usize,
        bands: usize,
        fill: i16,
        saturate: i16,
        scale: f64,
    ) -> Result<Self> {
        if lines == 0 || samples == 0 || bands == 0 {
            return Err(Error::InvalidDescriptor(format!(
                "dimensions must be positive, got {lines} lines x {samples} samples x {bands} bands"
            )));
        }
        if !(scale.is_finite() && scale > 0.0) {
            return Err(Error::InvalidDescriptor(format!(
                "scale factor must be positive and finite, got {scale}"
            )));
        }
        if fill == saturate {
            return Err(Error::InvalidDescriptor(format!(
                "fill and saturation values must differ, both are {fill}"
            )));
        }

        Ok(Self {
            lines,
            samples,
            bands,
            fill,
            saturate,
            scale,
        })
    }

    /// Descriptor of an index product with `bands` output slots.
    pub fn index_output(lines: usize, samples: usize, bands: usize) -> Result<Self> {
        Self::new(lines, samples, bands, FILL_OUT, SATURATE_OUT, OUTPUT_SCALE)
    }

    pub fn lines(&self) -> usize {
        self.lines
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn bands(&self) -> usize {
        self.bands
    }

    pub fn fill(&self) -> i16 {
        self.fill
    }

    pub fn saturate(&self) -> i16 {
        self.saturate
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Bytes occupied by one band plane of `i16` samples.
    pub fn band_bytes(&self) -> u64 {
        (self.lines * self.samples * std::mem::size_of::<i16>()) as u64
    }

    /// Check a band/line range against this geometry.
    pub fn check_range(&self, band: usize, start_line: usize, line_count: usize) -> Result<()> {
        if band >= self.bands {
            return Err(Error::precondition(format!(
                "band {band} out of range, raster has {} bands",
                self.bands
            )));
        }
        if line_count == 0 {
            return Err(Error::precondition(format!(
                "empty window requested at line {start_line} of band {band}"
            )));
        }
        match start_line.checked_add(line_count) {
            Some(end) if end <= self.lines => Ok(()),
            _ => Err(Error::precondition(format!(
                "lines {start_line}..{} exceed raster height {}",
                start_line.saturating_add(line_count),
                self.lines
            ))),
        }
    }
}

/// Classification of one stored sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelState {
    Fill,
    Saturated,
    Valid(i16),
}

impl PixelState {
    /// Fill is checked before saturation.
    pub fn classify(sample: i16, fill: i16, saturate: i16) -> Self {
        if sample == fill {
            PixelState::Fill
        } else if sample == saturate {
            PixelState::Saturated
        } else {
            PixelState::Valid(sample)
        }
    }
}

/// Reusable `height x samples` buffer for one band.
///
/// Capacity is fixed when the window is allocated; each iteration only
/// changes the current height, never the allocation.
#[derive(Debug, Clone)]
pub struct Window {
    samples: usize,
    capacity_lines: usize,
    lines: usize,
    data: Vec<i16>,
}

impl Window {
    pub fn new(capacity_lines: usize, samples: usize) -> Self {
        Self {
            samples,
            capacity_lines,
            lines: capacity_lines,
            data: vec![0; capacity_lines * samples],
        }
    }

    /// Window holding exactly `data`, one line per `samples` values.
    pub fn from_vec(samples: usize, data: Vec<i16>) -> Result<Self> {
        if samples == 0 || data.len() % samples != 0 {
            return Err(Error::precondition(format!(
                "{} values do not form whole lines of {samples} samples",
                data.len()
            )));
        }
        let lines = data.len() / samples;
        Ok(Self {
            samples,
            capacity_lines: lines,
            lines,
            data,
        })
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn lines(&self) -> usize {
        self.lines
    }

    pub fn capacity_lines(&self) -> usize {
        self.capacity_lines
    }

    pub fn set_lines(&mut self, lines: usize) -> Result<()> {
        if lines > self.capacity_lines {
            return Err(Error::precondition(format!(
                "window of {} lines cannot hold {lines} lines",
                self.capacity_lines
            )));
        }
        self.lines = lines;
        Ok(())
    }

    pub fn as_slice(&self) -> &[i16] {
        &self.data[..self.lines * self.samples]
    }

    pub fn as_mut_slice(&mut self) -> &mut [i16] {
        &mut self.data[..self.lines * self.samples]
    }

    pub fn into_vec(mut self) -> Vec<i16> {
        self.data.truncate(self.lines * self.samples);
        self.data
    }
}
