//! Scale epilogue: dequantization and output conversion
//!
//! The engine accumulates every group's product in f32, wider than the FP8
//! inputs. Before a value is written out it passes through this epilogue:
//!
//! ```text
//! out[token, channel] = convert(acc * scale_a(token) * scale_b(channel))
//! ```
//!
//! `scale_a` broadcasts per activation token or as a single scalar;
//! `scale_b` broadcasts per output channel or as a single scalar. The
//! output format is fixed once per dispatch, never per element.

use half::{bf16, f16};

use crate::layout::{OutDType, ScaleTensor};

/// Output element formats the epilogue can convert to
///
/// Sealed in practice: the two implementations are the two supported
/// output formats.
pub trait OutputElement: Copy + Send + Sync + 'static {
    /// The runtime tag for this format
    const DTYPE: OutDType;

    /// Round an f32 accumulation to this format
    fn from_accum(value: f32) -> Self;
}

impl OutputElement for f16 {
    const DTYPE: OutDType = OutDType::F16;

    fn from_accum(value: f32) -> Self {
        f16::from_f32(value)
    }
}

impl OutputElement for bf16 {
    const DTYPE: OutDType = OutDType::Bf16;

    fn from_accum(value: f32) -> Self {
        bf16::from_f32(value)
    }
}

/// Per-dispatch scale transform
///
/// Holds the two scale tensors plus the broadcast flags. Token indices are
/// global row indices into the stacked output (0-based from the first
/// group's first row); channel indices are output columns.
#[derive(Debug, Clone, Copy)]
pub struct ScaleEpilogue<'a> {
    scale_a: ScaleTensor<'a>,
    scale_b: ScaleTensor<'a>,
    per_act_token: bool,
    per_out_ch: bool,
}

impl<'a> ScaleEpilogue<'a> {
    /// Build the epilogue for one dispatch
    ///
    /// Scale shape consistency with the flags is a caller contract and is
    /// not re-validated per call; debug builds assert it.
    #[must_use]
    pub fn new(
        scale_a: ScaleTensor<'a>,
        scale_b: ScaleTensor<'a>,
        per_act_token: bool,
        per_out_ch: bool,
    ) -> Self {
        debug_assert!(
            per_act_token || scale_a.data().len() == 1,
            "scalar scale_a must hold exactly one value"
        );
        debug_assert!(
            per_out_ch || scale_b.data().len() == 1,
            "scalar scale_b must hold exactly one value"
        );
        Self {
            scale_a,
            scale_b,
            per_act_token,
            per_out_ch,
        }
    }

    /// Activation scale for a global token index
    #[must_use]
    pub fn scale_a(&self, token: usize) -> f32 {
        if self.per_act_token {
            self.scale_a.get(token)
        } else {
            self.scale_a.get(0)
        }
    }

    /// Output-channel scale for a column index
    #[must_use]
    pub fn scale_b(&self, channel: usize) -> f32 {
        if self.per_out_ch {
            self.scale_b.get(channel)
        } else {
            self.scale_b.get(0)
        }
    }

    /// Apply both scales to a raw accumulation
    #[must_use]
    pub fn apply(&self, accum: f32, token: usize, channel: usize) -> f32 {
        accum * self.scale_a(token) * self.scale_b(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_broadcast() {
        let a = [2.0f32];
        let b = [0.5f32];
        let ep = ScaleEpilogue::new(
            ScaleTensor::scalar(&a),
            ScaleTensor::scalar(&b),
            false,
            false,
        );
        // Same scales regardless of position
        assert_eq!(ep.apply(8.0, 0, 0), 8.0);
        assert_eq!(ep.apply(8.0, 31, 127), 8.0);
    }

    #[test]
    fn test_per_token_lookup() {
        let a = [1.0f32, 2.0, 4.0];
        let b = [1.0f32];
        let ep = ScaleEpilogue::new(
            ScaleTensor::new(&a, 3, 1).unwrap(),
            ScaleTensor::scalar(&b),
            true,
            false,
        );
        assert_eq!(ep.apply(1.0, 0, 5), 1.0);
        assert_eq!(ep.apply(1.0, 2, 5), 4.0);
    }

    #[test]
    fn test_per_channel_lookup() {
        let a = [1.0f32];
        let b = [1.0f32, 10.0];
        let ep = ScaleEpilogue::new(
            ScaleTensor::scalar(&a),
            ScaleTensor::new(&b, 1, 2).unwrap(),
            false,
            true,
        );
        assert_eq!(ep.apply(3.0, 7, 0), 3.0);
        assert_eq!(ep.apply(3.0, 7, 1), 30.0);
    }

    #[test]
    fn test_output_element_rounding() {
        assert_eq!(f16::from_accum(1.5).to_f32(), 1.5);
        assert_eq!(bf16::from_accum(1.5).to_f32(), 1.5);
        assert_eq!(f16::DTYPE, OutDType::F16);
        assert_eq!(bf16::DTYPE, OutDType::Bf16);
    }
}
