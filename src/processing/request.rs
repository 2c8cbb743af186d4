// src/processing/request.rs
use std::fmt;
use std::str::FromStr;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::processing::indices::{IndexKernel, Kernel};

/// Named index products, in the order they are laid out in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpectralIndex {
    Ndvi,
    Evi,
    Savi,
    Msavi,
    Ndmi,
    Nbr,
    Nbr2,
}

impl SpectralIndex {
    pub const ALL: [SpectralIndex; 7] = [
        SpectralIndex::Ndvi,
        SpectralIndex::Evi,
        SpectralIndex::Savi,
        SpectralIndex::Msavi,
        SpectralIndex::Ndmi,
        SpectralIndex::Nbr,
        SpectralIndex::Nbr2,
    ];

    pub fn short_name(&self) -> &'static str {
        match self {
            SpectralIndex::Ndvi => "ndvi",
            SpectralIndex::Evi => "evi",
            SpectralIndex::Savi => "savi",
            SpectralIndex::Msavi => "msavi",
            SpectralIndex::Ndmi => "ndmi",
            SpectralIndex::Nbr => "nbr",
            SpectralIndex::Nbr2 => "nbr2",
        }
    }

    pub fn long_name(&self) -> &'static str {
        match self {
            SpectralIndex::Ndvi => "normalized difference vegetation index",
            SpectralIndex::Evi => "enhanced vegetation index",
            SpectralIndex::Savi => "soil adjusted vegetation index",
            SpectralIndex::Msavi => "modified soil adjusted vegetation index",
            SpectralIndex::Ndmi => "normalized difference moisture index",
            SpectralIndex::Nbr => "normalized burn ratio",
            SpectralIndex::Nbr2 => "normalized burn ratio 2",
        }
    }

    pub fn kernel(&self) -> Kernel {
        match self {
            SpectralIndex::Ndvi | SpectralIndex::Ndmi | SpectralIndex::Nbr | SpectralIndex::Nbr2 => {
                Kernel::NormalizedDifference
            }
            SpectralIndex::Evi => Kernel::EnhancedVegetation,
            SpectralIndex::Savi => Kernel::SoilAdjusted,
            SpectralIndex::Msavi => Kernel::ModifiedSoilAdjusted,
        }
    }

    /// Input bands in the order the kernel consumes them.
    pub fn input_bands(&self, roles: &BandRoles) -> Result<Vec<usize>> {
        let need = |role: Option<usize>, name: &str| {
            role.ok_or_else(|| {
                Error::precondition(format!("{} needs a {name} band", self.short_name()))
            })
        };

        Ok(match self {
            SpectralIndex::Ndvi | SpectralIndex::Savi | SpectralIndex::Msavi => {
                vec![need(roles.nir, "nir")?, need(roles.red, "red")?]
            }
            SpectralIndex::Evi => vec![
                need(roles.nir, "nir")?,
                need(roles.red, "red")?,
                need(roles.blue, "blue")?,
            ],
            SpectralIndex::Ndmi => vec![need(roles.nir, "nir")?, need(roles.swir1, "swir1")?],
            SpectralIndex::Nbr => vec![need(roles.nir, "nir")?, need(roles.swir2, "swir2")?],
            SpectralIndex::Nbr2 => vec![need(roles.swir1, "swir1")?, need(roles.swir2, "swir2")?],
        })
    }
}

impl fmt::Display for SpectralIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for SpectralIndex {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        SpectralIndex::ALL
            .into_iter()
            .find(|index| index.short_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Config(format!("unknown spectral index: {s}")))
    }
}

/// Slots of the physical bands inside the source raster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandRoles {
    pub blue: Option<usize>,
    pub red: Option<usize>,
    pub nir: Option<usize>,
    pub swir1: Option<usize>,
    pub swir2: Option<usize>,
}

/// Sensor presets mapping physical band numbers to source slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Instrument {
    /// Landsat 4-7 TM/ETM+: b1 b2 b3 b4 b5 b7
    Tm,
    /// Landsat 8 OLI: b1 b2 b3 b4 b5 b6 b7
    OliTirs,
}

impl Instrument {
    pub fn band_roles(&self) -> BandRoles {
        match self {
            Instrument::Tm => BandRoles {
                blue: Some(0),
                red: Some(2),
                nir: Some(3),
                swir1: Some(4),
                swir2: Some(5),
            },
            Instrument::OliTirs => BandRoles {
                blue: Some(1),
                red: Some(3),
                nir: Some(4),
                swir1: Some(5),
                swir2: Some(6),
            },
        }
    }

    /// Reflective band count of the product this instrument produces.
    pub fn band_count(&self) -> usize {
        match self {
            Instrument::Tm => 6,
            Instrument::OliTirs => 7,
        }
    }
}

impl FromStr for Instrument {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.to_ascii_uppercase();
        if upper == "TM" || upper.starts_with("ETM") {
            Ok(Instrument::Tm)
        } else if upper == "OLI_TIRS" || upper == "OLI-TIRS" || upper == "OLI" {
            Ok(Instrument::OliTirs)
        } else {
            Err(Error::Config(format!("unsupported instrument: {s}")))
        }
    }
}

/// One output band: which inputs feed which kernel, written to which slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRequest {
    pub index: SpectralIndex,
    pub kernel: Kernel,
    pub inputs: Vec<usize>,
    pub output_band: usize,
}

impl IndexRequest {
    pub fn new(index: SpectralIndex, inputs: Vec<usize>, output_band: usize) -> Result<Self> {
        let kernel = index.kernel();
        if inputs.len() != kernel.required_bands() {
            return Err(Error::precondition(format!(
                "{index} takes {} input bands, got {}",
                kernel.required_bands(),
                inputs.len()
            )));
        }
        Ok(Self {
            index,
            kernel,
            inputs,
            output_band,
        })
    }
}

/// Build the request list for `indices`: canonical order, duplicates
/// dropped, output slots assigned in that order.
pub fn build_requests(indices: &[SpectralIndex], roles: &BandRoles) -> Result<Vec<IndexRequest>> {
    if indices.is_empty() {
        return Err(Error::Config(
            "no index product was specified for processing".to_string(),
        ));
    }

    indices
        .iter()
        .copied()
        .sorted()
        .dedup()
        .enumerate()
        .map(|(slot, index)| IndexRequest::new(index, index.input_bands(roles)?, slot))
        .collect()
}
