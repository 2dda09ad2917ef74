//! FP8 E4M3 element type
//!
//! The single quantized input format supported by the grouped matmul engine:
//! 1 sign bit, 4 exponent bits (bias 7), 3 mantissa bits. This is the "FN"
//! variant used by inference accelerators: there are no infinities, the
//! all-ones pattern `S.1111.111` is NaN, and the largest finite magnitude
//! is 448.0.
//!
//! Dequantization in hot loops goes through a 256-entry lookup table
//! ([`f8_to_f32_lut`]) rather than per-element bit manipulation, the same
//! approach used for f16 scale decoding in block-quantized formats.

use std::fmt;
use std::sync::OnceLock;

/// Smallest positive value (denormal quantum): 2^-9
const F8_DENORM_QUANTUM: f32 = 1.0 / 512.0;

/// Largest finite magnitude: (1 + 6/8) * 2^8
pub const F8_MAX: f32 = 448.0;

/// Exponent bias
const F8_BIAS: i32 = 7;

/// An FP8 E4M3FN value stored as its raw byte encoding
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct F8E4M3(pub u8);

impl F8E4M3 {
    /// Positive zero
    pub const ZERO: Self = Self(0x00);

    /// Canonical NaN encoding
    pub const NAN: Self = Self(0x7F);

    /// Decode to f32
    ///
    /// Exact for every encoding: all 255 non-NaN codes are representable
    /// in f32 without rounding.
    #[must_use]
    pub fn to_f32(self) -> f32 {
        let sign = if self.0 & 0x80 != 0 { -1.0f32 } else { 1.0f32 };
        let exp = i32::from((self.0 >> 3) & 0x0F);
        let man = f32::from(self.0 & 0x07);

        if exp == 0 {
            // Denormal: no implicit leading bit
            sign * man * F8_DENORM_QUANTUM
        } else if exp == 0x0F && (self.0 & 0x07) == 0x07 {
            f32::NAN
        } else {
            sign * (1.0 + man / 8.0) * ((exp - F8_BIAS) as f32).exp2()
        }
    }

    /// Encode from f32 with round-to-nearest-even and saturation
    ///
    /// Values above the largest finite magnitude saturate to ±448.0
    /// (there is no infinity in E4M3FN); NaN maps to the canonical NaN
    /// encoding with the input's sign.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_f32(value: f32) -> Self {
        let sign = if value.is_sign_negative() { 0x80u8 } else { 0x00 };
        if value.is_nan() {
            return Self(sign | 0x7F);
        }

        let ax = value.abs();
        if ax > F8_MAX {
            return Self(sign | 0x7E);
        }

        // Unbiased f32 exponent; negative and denormal inputs fall through
        // to the denormal branch below.
        let e = ((ax.to_bits() >> 23) & 0xFF) as i32 - 127;

        if e < -6 {
            // Target is denormal: quantize in units of 2^-9
            let q = (ax / F8_DENORM_QUANTUM).round_ties_even() as u32;
            if q <= 7 {
                return Self(sign | q as u8);
            }
            // Rounded up into the smallest normal (exp=1, mantissa=0)
            return Self(sign | 0x08);
        }

        // Normal: round the 3-bit mantissa at the input's binade
        let scale = (e as f32).exp2();
        let m = ((ax / scale - 1.0) * 8.0).round_ties_even() as u32;
        if m == 8 {
            // Mantissa overflow carries into the exponent
            let e = e + 1;
            if e > 8 {
                return Self(sign | 0x7E);
            }
            let biased = (e + F8_BIAS) as u8;
            return Self(sign | (biased << 3));
        }
        let biased = (e + F8_BIAS) as u8;
        Self(sign | (biased << 3) | m as u8)
    }

    /// Raw byte encoding
    #[must_use]
    pub fn to_bits(self) -> u8 {
        self.0
    }
}

impl From<f32> for F8E4M3 {
    fn from(value: f32) -> Self {
        Self::from_f32(value)
    }
}

impl From<F8E4M3> for f32 {
    fn from(value: F8E4M3) -> Self {
        value.to_f32()
    }
}

impl fmt::Debug for F8E4M3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F8E4M3({:#04x} = {})", self.0, self.to_f32())
    }
}

static F8_TO_F32: OnceLock<[f32; 256]> = OnceLock::new();

/// 256-entry dequantization table, built once on first use
///
/// Hot loops index this table by the raw byte instead of decoding bits
/// per element.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn f8_to_f32_lut() -> &'static [f32; 256] {
    F8_TO_F32.get_or_init(|| {
        let mut table = [0.0f32; 256];
        for (code, slot) in table.iter_mut().enumerate() {
            *slot = F8E4M3(code as u8).to_f32();
        }
        table
    })
}
