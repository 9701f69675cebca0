//! Numeric record encodings used by `increment` and `increment_double`
//!
//! - Integers are stored as 8 bytes, big-endian, two's complement.
//! - Decimals are stored as 16 bytes: the integral part as a big-endian
//!   `i64`, then the fractional part as a big-endian `i64` counted in
//!   units of 10^-15. Both parts carry the sign of the number.

use crate::error::{Error, Result};

/// Width of an encoded integer record
pub const INT_WIDTH: usize = 8;

/// Width of an encoded decimal record
pub const DECIMAL_WIDTH: usize = 16;

/// Fractional units per whole number in the decimal encoding
pub const DECIMAL_UNIT: i64 = 1_000_000_000_000_000;

/// Encode an integer record value
pub fn encode_int(n: i64) -> [u8; INT_WIDTH] {
    n.to_be_bytes()
}

/// Decode an integer record value
///
/// Fails with `LOGIC` when the value is not exactly eight bytes.
pub fn decode_int(value: &[u8]) -> Result<i64> {
    let bytes: [u8; INT_WIDTH] = value.try_into().map_err(|_| {
        Error::logic(format!(
            "logical inconsistency: value is {} bytes, not an {}-byte integer",
            value.len(),
            INT_WIDTH
        ))
    })?;
    Ok(i64::from_be_bytes(bytes))
}

/// Encode a decimal record value
///
/// Fails with `LOGIC` for non-finite numbers or numbers whose integral
/// part does not fit an `i64`.
pub fn encode_decimal(n: f64) -> Result<[u8; DECIMAL_WIDTH]> {
    if !n.is_finite() {
        return Err(Error::logic("logical inconsistency: number is not finite"));
    }
    let integral = n.trunc();
    if integral < i64::MIN as f64 || integral >= i64::MAX as f64 {
        return Err(Error::logic("logical inconsistency: number out of range"));
    }
    let fraction = ((n - integral) * DECIMAL_UNIT as f64).round() as i64;
    let mut out = [0u8; DECIMAL_WIDTH];
    out[..8].copy_from_slice(&(integral as i64).to_be_bytes());
    out[8..].copy_from_slice(&fraction.to_be_bytes());
    Ok(out)
}

/// Decode a decimal record value
pub fn decode_decimal(value: &[u8]) -> Result<f64> {
    if value.len() != DECIMAL_WIDTH {
        return Err(Error::logic(format!(
            "logical inconsistency: value is {} bytes, not a {}-byte decimal",
            value.len(),
            DECIMAL_WIDTH
        )));
    }
    let mut integral = [0u8; 8];
    let mut fraction = [0u8; 8];
    integral.copy_from_slice(&value[..8]);
    fraction.copy_from_slice(&value[8..]);
    let integral = i64::from_be_bytes(integral) as f64;
    let fraction = i64::from_be_bytes(fraction) as f64 / DECIMAL_UNIT as f64;
    Ok(integral + fraction)
}
