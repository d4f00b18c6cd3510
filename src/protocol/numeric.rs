//! Arbitrary-precision helpers for `bigint`, `varint` and `decimal` values.
//!
//! Integers travel as big-endian two's-complement byte strings. Decimals are
//! a 4-byte scale followed by the unscaled integer.

use std::str::FromStr;

use num_bigint::{BigInt, Sign};

use super::error::{CodecError, CodecResult};

/// Largest decimal scale, in either direction, accepted on encode and decode.
pub(crate) const MAX_DECIMAL_SCALE: u32 = 10_000;

fn check_scale(scale: i32) -> CodecResult<()> {
    if scale.unsigned_abs() > MAX_DECIMAL_SCALE {
        return Err(CodecError::Overflow(format!(
            "decimal scale {} exceeds {}",
            scale, MAX_DECIMAL_SCALE
        )));
    }
    Ok(())
}

/// Parse a base-10 integer string.
pub(crate) fn parse_integer(text: &str) -> CodecResult<BigInt> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(CodecError::InvalidValue("empty integer string".to_string()));
    }
    BigInt::from_str(trimmed)
        .map_err(|_| CodecError::InvalidValue(format!("'{}' is not an integer", text)))
}

/// Two's-complement bytes of a varint.
pub(crate) fn varint_to_bytes(value: &BigInt) -> Vec<u8> {
    value.to_signed_bytes_be()
}

/// Varint from two's-complement bytes; an empty string is zero.
pub(crate) fn varint_from_bytes(bytes: &[u8]) -> BigInt {
    BigInt::from_signed_bytes_be(bytes)
}

/// Convert a decimal string to a 64-bit integer through its minimal
/// two's-complement encoding, sign-extended to 8 bytes.
pub(crate) fn long_from_decimal(text: &str) -> CodecResult<i64> {
    let bytes = parse_integer(text)?.to_signed_bytes_be();
    if bytes.len() > 8 {
        return Err(CodecError::Overflow(format!(
            "'{}' needs {} bytes, bigint holds 8",
            text.trim(),
            bytes.len()
        )));
    }
    let fill = if bytes.first().is_some_and(|b| b & 0x80 != 0) { 0xFF } else { 0x00 };
    let mut padded = [fill; 8];
    padded[8 - bytes.len()..].copy_from_slice(&bytes);
    Ok(i64::from_be_bytes(padded))
}

/// Encode a fixed-point string such as `-0.000123` as scale + unscaled value.
pub(crate) fn encode_decimal(text: &str) -> CodecResult<Vec<u8>> {
    let trimmed = text.trim();
    let invalid = || CodecError::InvalidValue(format!("'{}' is not a decimal", text));

    let (negative, body) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let (integer, fraction) = match body.split_once('.') {
        Some((i, f)) => (i, f),
        None => (body, ""),
    };
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if integer.len() + fraction.len() == 0 || !all_digits(integer) || !all_digits(fraction) {
        return Err(invalid());
    }

    let scale = i32::try_from(fraction.len())
        .map_err(|_| CodecError::Overflow(format!("decimal scale of '{}'", text)))?;
    check_scale(scale)?;
    let mut digits = String::with_capacity(integer.len() + fraction.len());
    digits.push_str(integer);
    digits.push_str(fraction);
    let mut unscaled = BigInt::from_str(&digits).map_err(|_| invalid())?;
    if negative {
        unscaled = -unscaled;
    }

    let mut out = scale.to_be_bytes().to_vec();
    out.extend_from_slice(&unscaled.to_signed_bytes_be());
    Ok(out)
}

/// Decode scale + unscaled value back into a fixed-point string.
pub(crate) fn decode_decimal(bytes: &[u8]) -> CodecResult<String> {
    if bytes.len() < 4 {
        return Err(CodecError::UnexpectedEof { needed: 4, remaining: bytes.len() });
    }
    let scale = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    check_scale(scale)?;
    let unscaled = BigInt::from_signed_bytes_be(&bytes[4..]);

    if scale <= 0 {
        let factor = BigInt::from(10u32).pow(scale.unsigned_abs());
        return Ok((unscaled * factor).to_string());
    }

    let scale = scale as usize;
    let digits = unscaled.magnitude().to_string();
    let sign = if unscaled.sign() == Sign::Minus { "-" } else { "" };

    if digits.len() <= scale {
        let zeros = "0".repeat(scale - digits.len());
        Ok(format!("{}0.{}{}", sign, zeros, digits))
    } else {
        let (whole, fraction) = digits.split_at(digits.len() - scale);
        Ok(format!("{}{}.{}", sign, whole, fraction))
    }
}
