// src/processing/indices/savi.rs
use super::IndexKernel;

/// Soil Adjusted Vegetation Index
/// SAVI = ((NIR - RED) / (NIR + RED + L)) * (1 + L)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoilAdjusted {
    soil_factor: f64,
}

impl SoilAdjusted {
    pub fn new(soil_factor: f64) -> Self {
        Self { soil_factor }
    }

    pub fn soil_factor(&self) -> f64 {
        self.soil_factor
    }
}

impl Default for SoilAdjusted {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl IndexKernel for SoilAdjusted {
    fn name(&self) -> &'static str {
        "soil adjusted"
    }

    fn required_bands(&self) -> usize {
        2 // NIR, RED
    }

    fn needs_input_scaling(&self) -> bool {
        true
    }

    fn ratio(&self, pixel: &[f64]) -> f64 {
        let (nir, red) = (pixel[0], pixel[1]);
        let l = self.soil_factor;
        ((nir - red) / (nir + red + l)) * (1.0 + l)
    }
}
