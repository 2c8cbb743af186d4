// src/processing/indices/mod.rs
pub mod evi;
pub mod msavi2;
pub mod ndi;
pub mod savi;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::raster::{RasterDescriptor, FILL_OUT, SATURATE_OUT};
use crate::utils::fixed_point::quantize;

pub use evi::EnhancedVegetation;
pub use msavi2::ModifiedSoilAdjusted;
pub use ndi::NormalizedDifference;
pub use savi::SoilAdjusted;

/// Largest number of input bands any kernel consumes.
pub const MAX_KERNEL_BANDS: usize = 3;

/// Pixels handed to one rayon task.
const MIN_PIXELS_PER_TASK: usize = 4096;

/// A ratio formula over one or more input bands.
pub trait IndexKernel: Send + Sync {
    /// Return the name of the formula
    fn name(&self) -> &'static str;

    /// Return the number of required input bands
    fn required_bands(&self) -> usize;

    /// True when the formula carries constants and must see physical
    /// reflectance (`raw * scale`) rather than stored integers.
    fn needs_input_scaling(&self) -> bool {
        false
    }

    /// Unclamped ratio for one pixel whose samples are all valid.
    fn ratio(&self, pixel: &[f64]) -> f64;
}

/// Fill/saturation sentinels and scale of the input samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleEncoding {
    pub fill: i16,
    pub saturate: i16,
    pub scale: f64,
}

impl From<&RasterDescriptor> for SampleEncoding {
    fn from(d: &RasterDescriptor) -> Self {
        Self {
            fill: d.fill(),
            saturate: d.saturate(),
            scale: d.scale(),
        }
    }
}

/// Evaluate one pixel: fill wins over saturation, then the ratio is
/// clamped and quantized. Non-finite ratios (zero denominators) are fill.
pub fn evaluate_pixel<K: IndexKernel + ?Sized>(
    kernel: &K,
    samples: &[i16],
    encoding: &SampleEncoding,
) -> i16 {
    if samples.iter().any(|&s| s == encoding.fill) {
        return FILL_OUT;
    }
    if samples.iter().any(|&s| s == encoding.saturate) {
        return SATURATE_OUT;
    }

    let factor = if kernel.needs_input_scaling() {
        encoding.scale
    } else {
        1.0
    };
    let mut pixel = [0.0f64; MAX_KERNEL_BANDS];
    for (p, &s) in pixel.iter_mut().zip(samples) {
        *p = s as f64 * factor;
    }

    let ratio = kernel.ratio(&pixel[..samples.len()]);
    if ratio.is_finite() {
        quantize(ratio)
    } else {
        FILL_OUT
    }
}

/// Apply `kernel` to same-shaped input bands, writing `output` in place.
pub fn apply_kernel<K: IndexKernel + ?Sized>(
    kernel: &K,
    inputs: &[&[i16]],
    encoding: &SampleEncoding,
    output: &mut [i16],
) -> Result<()> {
    if inputs.len() != kernel.required_bands() || inputs.len() > MAX_KERNEL_BANDS {
        return Err(Error::precondition(format!(
            "{} requires {} input bands, got {}",
            kernel.name(),
            kernel.required_bands(),
            inputs.len()
        )));
    }
    if let Some(band) = inputs.iter().position(|band| band.len() != output.len()) {
        return Err(Error::precondition(format!(
            "{} input {band} holds {} samples, output holds {}",
            kernel.name(),
            inputs[band].len(),
            output.len()
        )));
    }

    output
        .par_iter_mut()
        .with_min_len(MIN_PIXELS_PER_TASK)
        .enumerate()
        .for_each(|(i, result)| {
            let mut samples = [0i16; MAX_KERNEL_BANDS];
            for (s, band) in samples.iter_mut().zip(inputs) {
                *s = band[i];
            }
            *result = evaluate_pixel(kernel, &samples[..inputs.len()], encoding);
        });

    Ok(())
}

/// The ratio formulas an index request can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kernel {
    NormalizedDifference,
    SoilAdjusted,
    ModifiedSoilAdjusted,
    EnhancedVegetation,
}

impl IndexKernel for Kernel {
    fn name(&self) -> &'static str {
        match self {
            Kernel::NormalizedDifference => NormalizedDifference.name(),
            Kernel::SoilAdjusted => SoilAdjusted::default().name(),
            Kernel::ModifiedSoilAdjusted => ModifiedSoilAdjusted::default().name(),
            Kernel::EnhancedVegetation => EnhancedVegetation::default().name(),
        }
    }

    fn required_bands(&self) -> usize {
        match self {
            Kernel::NormalizedDifference => NormalizedDifference.required_bands(),
            Kernel::SoilAdjusted => SoilAdjusted::default().required_bands(),
            Kernel::ModifiedSoilAdjusted => ModifiedSoilAdjusted::default().required_bands(),
            Kernel::EnhancedVegetation => EnhancedVegetation::default().required_bands(),
        }
    }

    fn needs_input_scaling(&self) -> bool {
        !matches!(self, Kernel::NormalizedDifference)
    }

    fn ratio(&self, pixel: &[f64]) -> f64 {
        match self {
            Kernel::NormalizedDifference => NormalizedDifference.ratio(pixel),
            Kernel::SoilAdjusted => SoilAdjusted::default().ratio(pixel),
            Kernel::ModifiedSoilAdjusted => ModifiedSoilAdjusted::default().ratio(pixel),
            Kernel::EnhancedVegetation => EnhancedVegetation::default().ratio(pixel),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENC: SampleEncoding = SampleEncoding {
        fill: -9999,
        saturate: 20000,
        scale: 0.0001,
    };

    struct FixedRatio(f64);

    impl IndexKernel for FixedRatio {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn required_bands(&self) -> usize {
            1
        }

        fn ratio(&self, _pixel: &[f64]) -> f64 {
            self.0
        }
    }

    #[test]
    fn out_of_range_ratio_is_clamped() {
        assert_eq!(evaluate_pixel(&FixedRatio(1.5), &[10], &ENC), 10000);
        assert_eq!(evaluate_pixel(&FixedRatio(-1.5), &[10], &ENC), -10000);
    }

    #[test]
    fn non_finite_ratio_is_fill() {
        assert_eq!(evaluate_pixel(&FixedRatio(f64::NAN), &[10], &ENC), FILL_OUT);
        assert_eq!(evaluate_pixel(&FixedRatio(f64::INFINITY), &[10], &ENC), FILL_OUT);
    }

    #[test]
    fn fill_takes_precedence_over_saturation() {
        let out = evaluate_pixel(&Kernel::NormalizedDifference, &[20000, -9999], &ENC);
        assert_eq!(out, FILL_OUT);
        let out = evaluate_pixel(&Kernel::EnhancedVegetation, &[-9999, 20000, 20000], &ENC);
        assert_eq!(out, FILL_OUT);
        let out = evaluate_pixel(&Kernel::NormalizedDifference, &[20000, 100], &ENC);
        assert_eq!(out, SATURATE_OUT);
    }

    #[test]
    fn apply_rejects_wrong_arity_and_shape() {
        let a = [1i16, 2];
        let b = [1i16, 2, 3];
        let mut out = [0i16; 2];
        assert!(matches!(
            apply_kernel(&Kernel::NormalizedDifference, &[&a], &ENC, &mut out),
            Err(Error::PreconditionViolation(_))
        ));
        assert!(matches!(
            apply_kernel(&Kernel::NormalizedDifference, &[&a, &b], &ENC, &mut out),
            Err(Error::PreconditionViolation(_))
        ));
    }

    #[test]
    fn enum_dispatch_matches_structs() {
        assert_eq!(Kernel::EnhancedVegetation.required_bands(), 3);
        assert_eq!(Kernel::SoilAdjusted.required_bands(), 2);
        assert!(!Kernel::NormalizedDifference.needs_input_scaling());
        assert!(Kernel::ModifiedSoilAdjusted.needs_input_scaling());
    }
}
