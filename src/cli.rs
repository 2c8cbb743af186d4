use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::batch::{BandFormat, RunSpec};
use crate::processing::{BandRoles, Instrument, SpectralIndex};

#[derive(Parser)]
#[command(name = "spectral-indices")]
#[command(about = "Windowed spectral index generator for scaled reflectance bands")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log every window and progress step
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compute index products for a single scene
    Run(RunArgs),

    /// Process every scene listed in a JSON batch file
    Batch {
        /// Batch configuration file
        config: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Reflectance band files, in band order
    #[arg(short = 'b', long = "band", required = true, num_args = 1..)]
    pub bands: Vec<PathBuf>,

    /// Scene name used to build output file names
    #[arg(long, default_value = "scene")]
    pub scene: String,

    /// Image height in lines (raw bands)
    #[arg(long)]
    pub lines: Option<usize>,

    /// Image width in samples (raw bands)
    #[arg(long)]
    pub samples: Option<usize>,

    /// Input fill value
    #[arg(long, default_value_t = -9999, allow_negative_numbers = true)]
    pub fill: i16,

    /// Input saturation value
    #[arg(long, default_value_t = 20000)]
    pub saturate: i16,

    /// Reflectance scale factor of the input
    #[arg(long, default_value_t = 0.0001)]
    pub scale: f64,

    /// Sensor preset for band roles: TM, ETM, OLI_TIRS
    #[arg(short = 'i', long)]
    pub instrument: Option<Instrument>,

    /// Blue band slot (overrides the instrument preset)
    #[arg(long)]
    pub blue: Option<usize>,

    /// Red band slot
    #[arg(long)]
    pub red: Option<usize>,

    /// NIR band slot
    #[arg(long)]
    pub nir: Option<usize>,

    /// SWIR1 band slot
    #[arg(long)]
    pub swir1: Option<usize>,

    /// SWIR2 band slot
    #[arg(long)]
    pub swir2: Option<usize>,

    #[arg(long)]
    pub ndvi: bool,
    #[arg(long)]
    pub evi: bool,
    #[arg(long)]
    pub savi: bool,
    #[arg(long)]
    pub msavi: bool,
    #[arg(long)]
    pub ndmi: bool,
    #[arg(long)]
    pub nbr: bool,
    #[arg(long)]
    pub nbr2: bool,

    /// Inputs are top-of-atmosphere reflectance (`toa_` product prefix)
    #[arg(long)]
    pub toa: bool,

    /// Read bands through GDAL and write one GeoTIFF
    #[arg(long)]
    pub gdal: bool,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Lines per processing window
    #[arg(long, default_value_t = 1000)]
    pub window_lines: usize,

    /// Worker threads (default: all cores)
    #[arg(short = 'j', long)]
    pub threads: Option<usize>,

    /// Write a JSON run summary here
    #[arg(long)]
    pub summary: Option<PathBuf>,
}

impl RunArgs {
    pub fn selected_indices(&self) -> Vec<SpectralIndex> {
        let flags = [
            self.ndvi, self.evi, self.savi, self.msavi, self.ndmi, self.nbr, self.nbr2,
        ];
        SpectralIndex::ALL
            .into_iter()
            .zip(flags)
            .filter_map(|(index, on)| on.then_some(index))
            .collect()
    }

    /// Explicit roles win over the instrument preset, field by field.
    pub fn band_roles(&self) -> Option<BandRoles> {
        let explicit = [self.blue, self.red, self.nir, self.swir1, self.swir2];
        if explicit.iter().all(Option::is_none) {
            return self.instrument.map(|i| i.band_roles());
        }
        let base = self.instrument.map(|i| i.band_roles()).unwrap_or_default();
        Some(BandRoles {
            blue: self.blue.or(base.blue),
            red: self.red.or(base.red),
            nir: self.nir.or(base.nir),
            swir1: self.swir1.or(base.swir1),
            swir2: self.swir2.or(base.swir2),
        })
    }

    pub fn into_spec(self) -> RunSpec {
        RunSpec {
            indices: self.selected_indices(),
            roles: self.band_roles(),
            format: if self.gdal {
                BandFormat::Gdal
            } else {
                BandFormat::Raw
            },
            scene: self.scene,
            bands: self.bands,
            lines: self.lines,
            samples: self.samples,
            instrument: self.instrument,
            toa: self.toa,
            output_dir: Some(self.output_dir),
            fill: Some(self.fill),
            saturate: Some(self.saturate),
            scale: Some(self.scale),
            window_lines: Some(self.window_lines),
            threads: self.threads,
            summary: self.summary,
        }
    }
}
