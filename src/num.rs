//! Utilities for numerics.

use std::cmp::Ordering;

/// An `f32` that implements [`Ord`] according to the IEEE 754 totalOrder predicate.
///
/// Used to pick the maximum of a set of scores without having to deal with NaN.
#[derive(Debug, Clone, Copy)]
pub struct TotalF32(pub f32);

impl PartialEq for TotalF32 {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TotalF32 {}

impl PartialOrd for TotalF32 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TotalF32 {
    fn cmp(&self, other: &Self) -> Ordering {
        f32::total_cmp(&self.0, &other.0)
    }
}

/// Applies the standard sigmoid/logistic function to the input.
pub fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

/// Affine quantization parameters of an 8-bit tensor.
///
/// A real value `r` is represented by the byte `q` so that `r = (q - zero_point) * scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantParams {
    pub scale: f32,
    pub zero_point: i32,
}

impl QuantParams {
    pub fn new(scale: f32, zero_point: i32) -> Self {
        Self { scale, zero_point }
    }

    /// Quantizes `value`, saturating at the bounds of `u8`.
    ///
    /// A scale of 0 maps every value to the zero point.
    pub fn quantize(&self, value: f32) -> u8 {
        let scaled = if self.scale == 0.0 {
            0.0
        } else {
            (value / self.scale).round()
        };
        // `as i64` saturates, so huge or non-finite inputs can't overflow the addition.
        let q = scaled as i64 + i64::from(self.zero_point);
        q.clamp(0, 255) as u8
    }

    pub fn dequantize(&self, raw: u8) -> f32 {
        (i32::from(raw) - self.zero_point) as f32 * self.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_midpoint() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(10.0) > 0.9);
        assert!(sigmoid(-10.0) < 0.1);
    }

    #[test]
    fn quantize_rounds_and_saturates() {
        let params = QuantParams::new(0.5, 10);
        assert_eq!(params.quantize(0.0), 10);
        assert_eq!(params.quantize(1.0), 12);
        assert_eq!(params.quantize(0.74), 11);
        assert_eq!(params.quantize(-100.0), 0);
        assert_eq!(params.quantize(1000.0), 255);
        assert_eq!(params.quantize(f32::NAN), 10);
    }

    #[test]
    fn dequantize() {
        let params = QuantParams::new(1.0 / 256.0, 0);
        assert_eq!(params.dequantize(0), 0.0);
        assert_eq!(params.dequantize(128), 0.5);

        let params = QuantParams::new(0.1, 128);
        assert!((params.dequantize(138) - 1.0).abs() < 1e-6);
        assert!((params.dequantize(118) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn total_order() {
        let mut values = [TotalF32(1.0), TotalF32(-3.0), TotalF32(f32::NAN), TotalF32(0.5)];
        values.sort();
        assert_eq!(values[0].0, -3.0);
        assert_eq!(values[2].0, 1.0);
        assert!(values[3].0.is_nan());
    }
}
