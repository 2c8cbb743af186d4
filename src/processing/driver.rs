// src/processing/driver.rs
use flume::Sender;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::io::{RasterSink, RasterSource};
use crate::processing::indices::{apply_kernel, IndexKernel, SampleEncoding};
use crate::processing::request::IndexRequest;
use crate::raster::Window;
use crate::utils::cache::WindowCache;

/// Lines processed per window unless configured otherwise.
pub const DEFAULT_WINDOW_LINES: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Maximum window height. Bounds memory, independent of image size.
    pub window_lines: usize,
    /// Worker threads for kernel evaluation and band reads.
    pub threads: usize,
    /// Read the distinct bands of a window concurrently.
    pub parallel_reads: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            window_lines: DEFAULT_WINDOW_LINES,
            threads: num_cpus::get(),
            parallel_reads: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Opened,
    Streaming { current_line: usize },
    Closed,
    Failed,
}

/// Completion event, purely observational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub percent: u8,
    pub line: usize,
    pub total_lines: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputBand {
    pub slot: usize,
    pub name: String,
    pub long_name: String,
}

/// What a finished run produced, for downstream header writers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub bands_written: Vec<OutputBand>,
    pub lines: usize,
    pub samples: usize,
    pub windows: usize,
}

/// Streams a source through the requested kernels into a sink, one
/// window of lines at a time, in increasing line order.
pub struct StreamDriver<'a, S: RasterSource + ?Sized, K: RasterSink + ?Sized> {
    config: StreamConfig,
    requests: Vec<IndexRequest>,
    source: Option<&'a mut S>,
    sink: Option<&'a mut K>,
    state: DriverState,
    progress: Option<Sender<Progress>>,
}

impl<'a, S: RasterSource + ?Sized, K: RasterSink + ?Sized> StreamDriver<'a, S, K> {
    pub fn new(config: StreamConfig, requests: Vec<IndexRequest>) -> Result<Self> {
        if config.window_lines == 0 {
            return Err(Error::Config("window height must be at least one line".into()));
        }
        if config.threads == 0 {
            return Err(Error::Config("at least one worker thread is required".into()));
        }
        if requests.is_empty() {
            return Err(Error::Config(
                "no index product was specified for processing".into(),
            ));
        }

        Ok(Self {
            config,
            requests,
            source: None,
            sink: None,
            state: DriverState::Idle,
            progress: None,
        })
    }

    pub fn with_progress(mut self, progress: Sender<Progress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn requests(&self) -> &[IndexRequest] {
        &self.requests
    }

    /// Bind the source and sink after checking every request against them.
    pub fn open(&mut self, source: &'a mut S, sink: &'a mut K) -> Result<()> {
        if self.state != DriverState::Idle {
            return Err(Error::resource_state(format!(
                "driver is {:?}, it can only be opened once",
                self.state
            )));
        }

        let input = source.descriptor();
        let output = sink.descriptor();
        if (input.lines(), input.samples()) != (output.lines(), output.samples()) {
            return Err(Error::precondition(format!(
                "source is {}x{} but sink is {}x{}",
                input.lines(),
                input.samples(),
                output.lines(),
                output.samples()
            )));
        }

        for request in &self.requests {
            if request.inputs.len() != request.kernel.required_bands() {
                return Err(Error::precondition(format!(
                    "{} takes {} input bands, got {}",
                    request.index,
                    request.kernel.required_bands(),
                    request.inputs.len()
                )));
            }
            if let Some(band) = request.inputs.iter().find(|&&b| b >= input.bands()) {
                return Err(Error::precondition(format!(
                    "{} reads band {band}, source has {} bands",
                    request.index,
                    input.bands()
                )));
            }
            if request.output_band >= output.bands() {
                return Err(Error::precondition(format!(
                    "{} writes slot {}, sink has {} bands",
                    request.index,
                    request.output_band,
                    output.bands()
                )));
            }
        }
        if !self.requests.iter().map(|r| r.output_band).all_unique() {
            return Err(Error::precondition("two requests write the same output band"));
        }

        self.source = Some(source);
        self.sink = Some(sink);
        self.state = DriverState::Opened;
        Ok(())
    }

    /// Stream the whole image. On success both ends are closed; on any
    /// failure the sink is aborted and the driver ends in `Failed`.
    pub fn run(&mut self) -> Result<RunSummary> {
        let (source, sink) = match (self.state, self.source.take(), self.sink.take()) {
            (DriverState::Opened, Some(source), Some(sink)) => (source, sink),
            _ => {
                return Err(Error::resource_state(format!(
                    "driver is {:?}, open it before running",
                    self.state
                )))
            }
        };

        let result = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.threads)
            .build()
            .map_err(|e| Error::Config(format!("cannot build worker pool: {e}")))
            .and_then(|pool| pool.install(|| self.stream(&*source, &*sink)));

        let result = result.and_then(|summary| {
            source.close()?;
            sink.close()?;
            Ok(summary)
        });

        match result {
            Ok(summary) => {
                self.state = DriverState::Closed;
                info!(
                    bands = summary.bands_written.len(),
                    lines = summary.lines,
                    windows = summary.windows,
                    "spectral index run complete"
                );
                Ok(summary)
            }
            Err(e) => {
                error!(state = ?self.state, "spectral index run failed: {e}");
                self.state = DriverState::Failed;
                sink.abort();
                if let Err(close_err) = source.close() {
                    debug!("source already released: {close_err}");
                }
                Err(e)
            }
        }
    }

    fn stream(&mut self, source: &S, sink: &K) -> Result<RunSummary> {
        let descriptor = *source.descriptor();
        let (lines, samples) = (descriptor.lines(), descriptor.samples());
        let encoding = SampleEncoding::from(&descriptor);
        let window_lines = self.config.window_lines;
        let capacity = window_lines.min(lines);

        let mut cache = WindowCache::for_requests(&self.requests, capacity, samples);
        let mut outputs: Vec<Window> = self
            .requests
            .iter()
            .map(|_| Window::new(capacity, samples))
            .collect();

        info!(
            lines,
            samples,
            window_lines = capacity,
            input_bands = cache.len(),
            products = self.requests.len(),
            "streaming spectral indices"
        );

        let mut reported = 0u8;
        self.report(0, 0, lines);
        let mut windows = 0;

        for start_line in (0..lines).step_by(window_lines) {
            let line_count = window_lines.min(lines - start_line);
            self.state = DriverState::Streaming {
                current_line: start_line,
            };

            let percent = (100 * start_line / lines) as u8;
            if percent > reported {
                reported = percent;
                self.report(percent, start_line, lines);
            }

            cache.fill(source, start_line, line_count, self.config.parallel_reads)?;

            for (request, output) in self.requests.iter().zip(outputs.iter_mut()) {
                output.set_lines(line_count)?;
                let inputs = request
                    .inputs
                    .iter()
                    .map(|&band| {
                        cache.get(band).map(Window::as_slice).ok_or_else(|| {
                            Error::precondition(format!("band {band} was not read for this window"))
                        })
                    })
                    .collect::<Result<Vec<&[i16]>>>()?;

                apply_kernel(&request.kernel, &inputs, &encoding, output.as_mut_slice())?;
                sink.write_window(request.output_band, start_line, output)?;
            }

            windows += 1;
            debug!(start_line, line_count, "window written");
        }

        self.report(100, lines, lines);

        Ok(RunSummary {
            bands_written: self
                .requests
                .iter()
                .map(|r| OutputBand {
                    slot: r.output_band,
                    name: r.index.short_name().to_string(),
                    long_name: r.index.long_name().to_string(),
                })
                .collect(),
            lines,
            samples,
            windows,
        })
    }

    fn report(&mut self, percent: u8, line: usize, total_lines: usize) {
        let event = Progress {
            percent,
            line,
            total_lines,
        };
        let disconnected = match &self.progress {
            Some(tx) => tx.send(event).is_err(),
            None => false,
        };
        if disconnected {
            warn!("progress receiver dropped, no further progress is reported");
            self.progress = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{RawSink, RawSource};
    use crate::processing::request::{build_requests, Instrument, SpectralIndex};
    use crate::raster::RasterDescriptor;
    use std::io::Cursor;

    #[test]
    fn dropped_progress_receiver_is_detached() {
        let (lines, samples) = (4, 3);
        let plane = vec![0u8; lines * samples * 2];
        let input = RasterDescriptor::new(lines, samples, 7, -9999, 20000, 0.0001).unwrap();
        let mut source =
            RawSource::open(input, (0..7).map(|_| Cursor::new(plane.clone())).collect()).unwrap();
        let output = RasterDescriptor::index_output(lines, samples, 1).unwrap();
        let mut sink = RawSink::open(output, vec![Cursor::new(Vec::new())]).unwrap();

        let requests =
            build_requests(&[SpectralIndex::Ndvi], &Instrument::OliTirs.band_roles()).unwrap();
        let config = StreamConfig {
            window_lines: 1,
            threads: 1,
            parallel_reads: false,
        };
        let (tx, rx) = flume::unbounded();
        drop(rx);

        let mut driver = StreamDriver::new(config, requests).unwrap().with_progress(tx);
        driver.open(&mut source, &mut sink).unwrap();
        driver.run().unwrap();
        assert!(driver.progress.is_none());
        assert_eq!(driver.state(), DriverState::Closed);
    }
}
