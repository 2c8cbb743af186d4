// src/processing/indices/ndi.rs
use super::IndexKernel;

/// Normalized difference of two bands: (A-B)/(A+B).
///
/// Works on the stored integers directly since a common scale factor
/// cancels out of the ratio. NDVI, NDMI, NBR and NBR2 only differ in the
/// band pairing fed to it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NormalizedDifference;

impl IndexKernel for NormalizedDifference {
    fn name(&self) -> &'static str {
        "normalized difference"
    }

    fn required_bands(&self) -> usize {
        2
    }

    fn ratio(&self, pixel: &[f64]) -> f64 {
        let (a, b) = (pixel[0], pixel[1]);
        (a - b) / (a + b)
    }
}
