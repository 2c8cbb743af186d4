// src/processing/indices/evi.rs
use super::IndexKernel;

/// Enhanced Vegetation Index
/// EVI = (NIR - RED) / (NIR + C1 * RED - C2 * BLUE + L)
///
/// Coefficients default to the MODIS set (C1 = 6, C2 = 7.5, L = 1). No
/// gain term is applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnhancedVegetation {
    c1: f64,
    c2: f64,
    l: f64,
}

impl EnhancedVegetation {
    pub fn new(c1: f64, c2: f64, l: f64) -> Self {
        Self { c1, c2, l }
    }
}

impl Default for EnhancedVegetation {
    fn default() -> Self {
        Self::new(6.0, 7.5, 1.0)
    }
}

impl IndexKernel for EnhancedVegetation {
    fn name(&self) -> &'static str {
        "enhanced vegetation"
    }

    fn required_bands(&self) -> usize {
        3 // NIR, RED, BLUE
    }

    fn needs_input_scaling(&self) -> bool {
        true
    }

    fn ratio(&self, pixel: &[f64]) -> f64 {
        let (nir, red, blue) = (pixel[0], pixel[1], pixel[2]);
        (nir - red) / (nir + self.c1 * red - self.c2 * blue + self.l)
    }
}
