// src/batch.rs
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::io::{RasterSink, RasterSource, RawSink, RawSource};
use crate::processing::{
    build_requests, BandRoles, IndexRequest, Instrument, Progress, RunSummary, SpectralIndex,
    StreamConfig, StreamDriver,
};
use crate::raster::RasterDescriptor;

#[derive(Deserialize, Serialize, Debug, Default)]
pub struct BatchConfig {
    #[serde(default)]
    pub global: GlobalParams,
    pub runs: Vec<RunSpec>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct GlobalParams {
    #[serde(default = "default_fill")]
    pub fill: i16,
    #[serde(default = "default_saturate")]
    pub saturate: i16,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub stream: StreamConfig,
}

impl Default for GlobalParams {
    fn default() -> Self {
        Self {
            fill: default_fill(),
            saturate: default_saturate(),
            scale: default_scale(),
            output_dir: default_output_dir(),
            stream: StreamConfig::default(),
        }
    }
}

fn default_fill() -> i16 {
    -9999
}

fn default_saturate() -> i16 {
    20000
}

fn default_scale() -> f64 {
    0.0001
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

/// How band files are stored on disk.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BandFormat {
    /// Raw little-endian int16 planes, one file per band
    #[default]
    Raw,
    /// Anything GDAL can open; output is a multi-band GeoTIFF
    Gdal,
}

/// One scene to process. Unset options fall back to `GlobalParams`.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RunSpec {
    pub scene: String,
    pub bands: Vec<PathBuf>,
    #[serde(default)]
    pub format: BandFormat,
    pub lines: Option<usize>,
    pub samples: Option<usize>,
    pub instrument: Option<Instrument>,
    pub roles: Option<BandRoles>,
    pub indices: Vec<SpectralIndex>,
    #[serde(default)]
    pub toa: bool,
    pub output_dir: Option<PathBuf>,
    pub fill: Option<i16>,
    pub saturate: Option<i16>,
    pub scale: Option<f64>,
    pub window_lines: Option<usize>,
    pub threads: Option<usize>,
    pub summary: Option<PathBuf>,
}

impl RunSpec {
    fn band_roles(&self) -> Result<BandRoles> {
        match (self.roles, self.instrument) {
            (Some(roles), _) => Ok(roles),
            (None, Some(instrument)) => Ok(instrument.band_roles()),
            (None, None) => bail!("scene {}: set either an instrument or explicit band roles", self.scene),
        }
    }

    fn product_prefix(&self) -> &'static str {
        if self.toa {
            "toa"
        } else {
            "sr"
        }
    }

    fn stream_config(&self, global: &GlobalParams) -> StreamConfig {
        StreamConfig {
            window_lines: self.window_lines.unwrap_or(global.stream.window_lines),
            threads: self.threads.unwrap_or(global.stream.threads),
            parallel_reads: global.stream.parallel_reads,
        }
    }

    /// `{output_dir}/{scene}_{prefix}_{index}.img` for each request.
    pub fn output_paths(&self, global: &GlobalParams, requests: &[IndexRequest]) -> Vec<PathBuf> {
        let dir = self.output_dir.as_ref().unwrap_or(&global.output_dir);
        requests
            .iter()
            .map(|r| {
                dir.join(format!(
                    "{}_{}_{}.img",
                    self.scene,
                    self.product_prefix(),
                    r.index.short_name()
                ))
            })
            .collect()
    }
}

/// Run one scene end to end. Partial output is removed on failure.
pub fn execute_run(spec: &RunSpec, global: &GlobalParams) -> Result<RunSummary> {
    if let Some(instrument) = spec.instrument {
        if spec.bands.len() < instrument.band_count() {
            bail!(
                "scene {}: {:?} products carry {} reflective bands, {} given",
                spec.scene,
                instrument,
                instrument.band_count(),
                spec.bands.len()
            );
        }
    }
    let roles = spec.band_roles()?;
    let requests = build_requests(&spec.indices, &roles)
        .with_context(|| format!("scene {}", spec.scene))?;
    let config = spec.stream_config(global);
    let fill = spec.fill.unwrap_or(global.fill);
    let saturate = spec.saturate.unwrap_or(global.saturate);
    let scale = spec.scale.unwrap_or(global.scale);

    info!(
        scene = %spec.scene,
        products = %requests.iter().map(|r| r.index.short_name()).collect::<Vec<_>>().join(","),
        "starting spectral indices processing"
    );

    let summary = match spec.format {
        BandFormat::Raw => {
            let (lines, samples) = spec.lines.zip(spec.samples).ok_or_else(|| {
                anyhow!("scene {}: lines and samples are required for raw bands", spec.scene)
            })?;
            let input = RasterDescriptor::new(lines, samples, spec.bands.len(), fill, saturate, scale)?;
            let output = RasterDescriptor::index_output(lines, samples, requests.len())?;
            let paths = spec.output_paths(global, &requests);

            let mut source = RawSource::open_files(input, &spec.bands)?;
            let mut sink = RawSink::create_files(output, &paths)?;
            let outcome = drive(&mut source, &mut sink, config, requests);
            sink.free()?;
            if outcome.is_err() {
                discard(&paths);
            }
            outcome?
        }
        BandFormat::Gdal => run_gdal(spec, global, config, requests, fill, saturate, scale)?,
    };

    if let Some(path) = &spec.summary {
        let file = fs::File::create(path)
            .with_context(|| format!("creating summary {}", path.display()))?;
        serde_json::to_writer_pretty(file, &summary)?;
    }

    info!(scene = %spec.scene, "spectral indices processing complete");
    Ok(summary)
}

#[cfg(feature = "gdal")]
fn run_gdal(
    spec: &RunSpec,
    global: &GlobalParams,
    config: StreamConfig,
    requests: Vec<IndexRequest>,
    fill: i16,
    saturate: i16,
    scale: f64,
) -> Result<RunSummary> {
    use crate::io::{GdalSink, GdalSource};

    let mut source = GdalSource::open(&spec.bands, fill, saturate, scale)?;
    let input = *source.descriptor();
    let output = RasterDescriptor::index_output(input.lines(), input.samples(), requests.len())?;
    let names: Vec<String> = requests
        .iter()
        .map(|r| format!("{}_{}", spec.product_prefix(), r.index.short_name()))
        .collect();
    let dir = spec.output_dir.as_ref().unwrap_or(&global.output_dir);
    let path = dir.join(format!("{}_{}_indices.tif", spec.scene, spec.product_prefix()));

    let mut sink = GdalSink::create(&path, output, &names, spec.bands.first().map(PathBuf::as_path))?;
    let outcome = drive(&mut source, &mut sink, config, requests);
    drop(sink);
    if outcome.is_err() {
        discard(std::slice::from_ref(&path));
    }
    outcome
}

#[cfg(not(feature = "gdal"))]
fn run_gdal(
    spec: &RunSpec,
    _global: &GlobalParams,
    _config: StreamConfig,
    _requests: Vec<IndexRequest>,
    _fill: i16,
    _saturate: i16,
    _scale: f64,
) -> Result<RunSummary> {
    bail!(
        "scene {}: GDAL input requested but this build has no `gdal` feature",
        spec.scene
    )
}

/// Wire a progress logger to the driver and stream the scene.
fn drive<S, K>(
    source: &mut S,
    sink: &mut K,
    config: StreamConfig,
    requests: Vec<IndexRequest>,
) -> Result<RunSummary>
where
    S: RasterSource,
    K: RasterSink,
{
    let (tx, rx) = flume::unbounded::<Progress>();
    let reporter = thread::spawn(move || {
        for progress in rx {
            info!("spectral indices -- % complete: {}%", progress.percent);
        }
    });

    let result = StreamDriver::new(config, requests)
        .map(|driver| driver.with_progress(tx))
        .and_then(|mut driver| {
            driver.open(source, sink)?;
            driver.run()
        });

    if reporter.join().is_err() {
        warn!("progress reporter panicked");
    }
    if result.is_err() {
        // a driver rejected at open never touched the sink
        sink.abort();
    }
    Ok(result?)
}

fn discard(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = remove_if_exists(path) {
            warn!("could not remove partial output {}: {e}", path.display());
        }
    }
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

pub fn process_batch(config_path: &Path) -> Result<()> {
    // Read and parse configuration file
    let config_content = fs::read_to_string(config_path)
        .with_context(|| format!("reading batch file {}", config_path.display()))?;
    let config: BatchConfig = serde_json::from_str(&config_content)?;

    info!("Starting batch processing with {} runs...", config.runs.len());

    for (i, spec) in config.runs.iter().enumerate() {
        info!("[{}/{}] Processing {}", i + 1, config.runs.len(), spec.scene);
        execute_run(spec, &config.global)?;
    }

    info!("Batch processing complete!");
    Ok(())
}
