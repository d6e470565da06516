//! Integer literal parsing: base 10 or lowercase-hex `0x`, range-checked
//! against a bit width.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NumericError {
    InvalidImmediate(String),
    ImmediateTooLarge(u32),
}

impl fmt::Display for NumericError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericError::InvalidImmediate(s) => write!(f, "invalid immediate '{s}'"),
            NumericError::ImmediateTooLarge(w) => {
                write!(f, "immediate out of range for {w}-bit field")
            }
        }
    }
}

impl std::error::Error for NumericError {}

/// Lowercase-hex, base-10 magnitude parse with an optional leading `-`.
/// Returns the magnitude's sign separately so callers can range-check
/// before combining.
fn parse_magnitude(s: &str) -> Result<(bool, u64), NumericError> {
    let (negative, rest) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };

    if rest.is_empty() {
        return Err(NumericError::InvalidImmediate(s.to_string()));
    }

    let magnitude = if let Some(hex) = rest.strip_prefix("0x") {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
            return Err(NumericError::InvalidImmediate(s.to_string()));
        }
        u64::from_str_radix(hex, 16).map_err(|_| NumericError::InvalidImmediate(s.to_string()))?
    } else {
        if !rest.bytes().all(|b| b.is_ascii_digit()) {
            return Err(NumericError::InvalidImmediate(s.to_string()));
        }
        rest.parse::<u64>()
            .map_err(|_| NumericError::InvalidImmediate(s.to_string()))?
    };

    Ok((negative, magnitude))
}

/// Accepts an optional leading `-`, then `0x<hex>` or `<dec>`. Succeeds iff
/// `-2^(w-1) <= v < 2^(w-1)`.
pub fn parse_signed(s: &str, w: u32) -> Result<i64, NumericError> {
    let (negative, magnitude) = parse_magnitude(s)?;
    let value = if negative {
        -(magnitude as i128)
    } else {
        magnitude as i128
    };

    let min = -(1i128 << (w - 1));
    let max = (1i128 << (w - 1)) - 1;
    if value < min || value > max {
        return Err(NumericError::ImmediateTooLarge(w));
    }

    Ok(value as i64)
}

/// Rejects a leading `-`. Succeeds iff `0 <= v < 2^w`.
pub fn parse_unsigned(s: &str, w: u32) -> Result<u64, NumericError> {
    if s.starts_with('-') {
        return Err(NumericError::InvalidImmediate(s.to_string()));
    }
    let (_, magnitude) = parse_magnitude(s)?;

    let max = if w >= 64 { u64::MAX } else { (1u64 << w) - 1 };
    if magnitude > max {
        return Err(NumericError::ImmediateTooLarge(w));
    }

    Ok(magnitude)
}

/// As `parse_signed`, but widens acceptance to `-2^(w-1) <= v < 2^w` so a
/// data-section token may be written either as signed or as unsigned.
pub fn parse_data(s: &str, w: u32) -> Result<i64, NumericError> {
    let (negative, magnitude) = parse_magnitude(s)?;
    let value = if negative {
        -(magnitude as i128)
    } else {
        magnitude as i128
    };

    let min = -(1i128 << (w - 1));
    let max = (1i128 << w) - 1;
    if value < min || value > max {
        return Err(NumericError::ImmediateTooLarge(w));
    }

    Ok(value as i64)
}
