// src/utils/cache.rs
use itertools::Itertools;
use rayon::prelude::*;

use crate::error::Result;
use crate::io::RasterSource;
use crate::processing::request::IndexRequest;
use crate::raster::Window;

/// One reusable window per distinct source band used by a run.
///
/// Requests sharing a band read it once per iteration.
pub struct WindowCache {
    bands: Vec<usize>,
    windows: Vec<Window>,
}

impl WindowCache {
    pub fn for_requests(requests: &[IndexRequest], capacity_lines: usize, samples: usize) -> Self {
        let bands: Vec<usize> = requests
            .iter()
            .flat_map(|r| r.inputs.iter().copied())
            .sorted()
            .dedup()
            .collect();
        let windows = bands
            .iter()
            .map(|_| Window::new(capacity_lines, samples))
            .collect();
        Self { bands, windows }
    }

    /// Source bands held, ascending.
    pub fn bands(&self) -> &[usize] {
        &self.bands
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    /// Read the same line range of every cached band.
    pub fn fill<S: RasterSource + ?Sized>(
        &mut self,
        source: &S,
        start_line: usize,
        line_count: usize,
        parallel: bool,
    ) -> Result<()> {
        if parallel {
            self.bands
                .par_iter()
                .zip(self.windows.par_iter_mut())
                .try_for_each(|(&band, window)| source.read_into(band, start_line, line_count, window))
        } else {
            self.bands
                .iter()
                .zip(self.windows.iter_mut())
                .try_for_each(|(&band, window)| source.read_into(band, start_line, line_count, window))
        }
    }

    pub fn get(&self, band: usize) -> Option<&Window> {
        self.bands
            .binary_search(&band)
            .ok()
            .map(|slot| &self.windows[slot])
    }
}
