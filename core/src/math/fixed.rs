use serde::{Deserialize, Serialize};

/// Fixed-precision power reading in hundredths of a dB.
///
/// `i16::MIN` is reserved as the NaN sentinel so that a cell nobody measured
/// can never be mistaken for a real reading of any level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FixedShort(i16);

impl FixedShort {
    pub const NAN: FixedShort = FixedShort(i16::MIN);
    pub const SCALE: f32 = 100.0;

    /// Offset of the single-byte packing, in centi-dB (-160 dB).
    const BYTE_OFFSET: i16 = -16_000;
    /// Step of the single-byte packing, in centi-dB (0.5 dB).
    const BYTE_STEP: i16 = 50;
    const BYTE_NAN: u8 = u8::MAX;

    pub const fn from_raw(raw: i16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i16 {
        self.0
    }

    pub const fn is_nan(self) -> bool {
        self.0 == i16::MIN
    }

    /// Quantise a dB value; non-finite input maps to NaN, out-of-range input saturates.
    pub fn from_db(value: f32) -> Self {
        if !value.is_finite() {
            return Self::NAN;
        }
        let scaled = (value * Self::SCALE).round();
        let clamped = scaled.clamp(f32::from(i16::MIN + 1), f32::from(i16::MAX));
        Self(clamped as i16)
    }

    pub fn to_db(self) -> f32 {
        if self.is_nan() {
            f32::NAN
        } else {
            f32::from(self.0) / Self::SCALE
        }
    }

    /// Decode a reading packed as half-dB steps above -160 dB (`255` is NaN).
    pub fn from_byte(byte: u8) -> Self {
        if byte == Self::BYTE_NAN {
            Self::NAN
        } else {
            Self(Self::BYTE_OFFSET + Self::BYTE_STEP * i16::from(byte))
        }
    }

    pub fn to_byte(self) -> u8 {
        if self.is_nan() {
            return Self::BYTE_NAN;
        }
        let steps = (i32::from(self.0) - i32::from(Self::BYTE_OFFSET)) / i32::from(Self::BYTE_STEP);
        steps.clamp(0, i32::from(Self::BYTE_NAN) - 1) as u8
    }
}

impl Default for FixedShort {
    fn default() -> Self {
        Self::NAN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_finite_values_become_nan() {
        assert!(FixedShort::from_db(f32::NAN).is_nan());
        assert!(FixedShort::from_db(f32::NEG_INFINITY).is_nan());
        assert!(FixedShort::NAN.to_db().is_nan());
    }

    #[test]
    fn zero_reading_is_not_nan() {
        let zero = FixedShort::from_db(0.0);
        assert!(!zero.is_nan());
        assert_eq!(zero.raw(), 0);
    }

    #[test]
    fn saturation_never_produces_the_sentinel() {
        assert_eq!(FixedShort::from_db(-1.0e6).raw(), i16::MIN + 1);
        assert_eq!(FixedShort::from_db(1.0e6).raw(), i16::MAX);
    }

    #[test]
    fn byte_packing_uses_half_db_steps() {
        assert_eq!(FixedShort::from_byte(0).to_db(), -160.0);
        assert_eq!(FixedShort::from_byte(40).to_db(), -140.0);
        assert!(FixedShort::from_byte(255).is_nan());
        assert_eq!(FixedShort::from_db(-140.0).to_byte(), 40);
        assert_eq!(FixedShort::NAN.to_byte(), 255);
    }
}
