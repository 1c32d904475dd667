//! 8-bit quantization of continuous index values.
//!
//! Every derived raster stores one byte per pixel. The value domain is
//! mapped linearly onto `0..=254`; `255` is reserved for nodata.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::RasterError;

/// Reserved nodata code.
pub const NODATA: u8 = 255;

/// Largest code a valid pixel may take.
pub const MAX_CODE: u8 = 254;

/// Continuous range a quantized layer represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueDomain {
    /// Normalized difference indices, `[-1, 1]`
    Signed,
    /// Risk scores, `[0, 1]`
    Unit,
}

impl ValueDomain {
    /// Inclusive bounds of the domain.
    pub fn bounds(self) -> (f32, f32) {
        match self {
            ValueDomain::Signed => (-1.0, 1.0),
            ValueDomain::Unit => (0.0, 1.0),
        }
    }

    /// Quantizes a value, clamping to the domain first.
    ///
    /// Non-finite input is rejected; it must never land on the nodata code.
    pub fn encode(self, value: f32) -> Result<u8, RasterError> {
        if !value.is_finite() {
            return Err(RasterError::Encoding {
                value,
                domain: self,
            });
        }
        let (lo, hi) = self.bounds();
        let clamped = f64::from(value.clamp(lo, hi));
        let (lo, hi) = (f64::from(lo), f64::from(hi));
        let scaled = ((clamped - lo) / (hi - lo) * f64::from(MAX_CODE)).round();
        if !(0.0..=f64::from(MAX_CODE)).contains(&scaled) {
            return Err(RasterError::Encoding {
                value,
                domain: self,
            });
        }
        Ok(scaled as u8)
    }

    /// Inverts [`encode`](Self::encode). Returns `None` for nodata.
    pub fn decode(self, code: u8) -> Option<f32> {
        if code == NODATA {
            return None;
        }
        let code = f32::from(code);
        Some(match self {
            ValueDomain::Signed => code / 254.0 * 2.0 - 1.0,
            ValueDomain::Unit => code / 254.0,
        })
    }

    /// Human-readable decode rule written into raster metadata.
    pub fn decode_formula(self) -> &'static str {
        match self {
            ValueDomain::Signed => "value = encoded / 254 * 2 - 1",
            ValueDomain::Unit => "value = encoded / 254",
        }
    }

    /// Encoding description written into raster metadata.
    pub fn encoding_description(self) -> &'static str {
        match self {
            ValueDomain::Signed => "uint8 0-254 maps -1..1, 255 nodata",
            ValueDomain::Unit => "uint8 0-254 maps 0..1, 255 nodata",
        }
    }
}

impl fmt::Display for ValueDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (lo, hi) = self.bounds();
        write!(f, "[{}, {}]", lo, hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_signed_anchor_points() {
        let d = ValueDomain::Signed;
        assert_eq!(d.encode(-1.0).unwrap(), 0);
        assert_eq!(d.encode(0.0).unwrap(), 127);
        assert_eq!(d.encode(1.0).unwrap(), 254);
        // (200 - 100) / (200 + 100)
        assert_eq!(d.encode(1.0 / 3.0).unwrap(), 169);
    }

    #[test]
    fn test_unit_anchor_points() {
        let d = ValueDomain::Unit;
        assert_eq!(d.encode(0.0).unwrap(), 0);
        assert_eq!(d.encode(0.5).unwrap(), 127);
        assert_eq!(d.encode(1.0).unwrap(), 254);
    }

    #[test]
    fn test_out_of_range_clamps() {
        assert_eq!(ValueDomain::Signed.encode(7.5).unwrap(), 254);
        assert_eq!(ValueDomain::Signed.encode(-3.0).unwrap(), 0);
        assert_eq!(ValueDomain::Unit.encode(-0.2).unwrap(), 0);
    }

    #[test]
    fn test_non_finite_rejected() {
        assert!(ValueDomain::Signed.encode(f32::NAN).is_err());
        assert!(ValueDomain::Unit.encode(f32::INFINITY).is_err());
    }

    #[test]
    fn test_nodata_decodes_to_none() {
        assert_eq!(ValueDomain::Signed.decode(NODATA), None);
        assert_eq!(ValueDomain::Unit.decode(NODATA), None);
    }

    #[test]
    fn test_decode_exact() {
        assert_eq!(ValueDomain::Signed.decode(0), Some(-1.0));
        assert_eq!(ValueDomain::Signed.decode(254), Some(1.0));
        assert_eq!(ValueDomain::Unit.decode(127), Some(127.0 / 254.0));
    }

    proptest! {
        #[test]
        fn prop_encode_never_nodata(v in -10.0f32..10.0) {
            let code = ValueDomain::Signed.encode(v).unwrap();
            prop_assert!(code <= MAX_CODE);
            let code = ValueDomain::Unit.encode(v).unwrap();
            prop_assert!(code <= MAX_CODE);
        }

        #[test]
        fn prop_signed_error_within_half_step(v in -1.0f32..=1.0) {
            let decoded = ValueDomain::Signed.decode(ValueDomain::Signed.encode(v).unwrap()).unwrap();
            prop_assert!((decoded - v).abs() <= 1.0 / 254.0 + 1e-6);
        }

        #[test]
        fn prop_unit_error_within_half_step(v in 0.0f32..=1.0) {
            let decoded = ValueDomain::Unit.decode(ValueDomain::Unit.encode(v).unwrap()).unwrap();
            prop_assert!((decoded - v).abs() <= 0.5 / 254.0 + 1e-6);
        }

        #[test]
        fn prop_encode_is_monotonic(a in -1.0f32..=1.0, b in -1.0f32..=1.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(ValueDomain::Signed.encode(lo).unwrap() <= ValueDomain::Signed.encode(hi).unwrap());
        }
    }
}
