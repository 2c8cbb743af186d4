// src/processing/indices/msavi2.rs
use super::IndexKernel;

/// Modified Soil Adjusted Vegetation Index (MSAVI2, Qi et al. 1994)
/// MSAVI = (2 * NIR + 1 - sqrt((2 * NIR + 1)^2 - 8 * (NIR - RED))) * L
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModifiedSoilAdjusted {
    soil_factor: f64,
}

impl ModifiedSoilAdjusted {
    pub fn new(soil_factor: f64) -> Self {
        Self { soil_factor }
    }
}

impl Default for ModifiedSoilAdjusted {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl IndexKernel for ModifiedSoilAdjusted {
    fn name(&self) -> &'static str {
        "modified soil adjusted"
    }

    fn required_bands(&self) -> usize {
        2 // NIR, RED
    }

    fn needs_input_scaling(&self) -> bool {
        true
    }

    fn ratio(&self, pixel: &[f64]) -> f64 {
        let (nir, red) = (pixel[0], pixel[1]);
        let two_nir_plus_one = 2.0 * nir + 1.0;
        let discriminant = two_nir_plus_one * two_nir_plus_one - 8.0 * (nir - red);
        // A negative discriminant yields NaN, which callers treat as fill.
        (two_nir_plus_one - discriminant.sqrt()) * self.soil_factor
    }
}
