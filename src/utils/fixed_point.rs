// src/utils/fixed_point.rs
use crate::raster::FLOAT_TO_INT;

/// Clamp a ratio to [-1, 1] and scale it to the stored integer.
///
/// Positive values round half up, negative values round half away from
/// zero, so `0.00005 -> 1` and `-0.00005 -> -1`.
pub fn quantize(ratio: f64) -> i16 {
    let clamped = ratio.clamp(-1.0, 1.0);
    if clamped >= 0.0 {
        (clamped * FLOAT_TO_INT + 0.5).floor() as i16
    } else {
        -((-clamped * FLOAT_TO_INT + 0.5).floor() as i16)
    }
}

/// Stored integer back to its real-valued index.
pub fn dequantize(value: i16) -> f64 {
    value as f64 / FLOAT_TO_INT
}
