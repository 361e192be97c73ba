//! Felt decoding for Starknet event payloads.
//!
//! Event data arrives as strings, usually `0x`-prefixed hex and occasionally
//! plain decimal. Values are parsed as 256-bit unsigned integers and then
//! narrowed to the type the handler needs. Addresses are normalised to a fixed
//! width so they compare equal as map keys regardless of leading zeros.

use alloy::primitives::U256;
use rust_decimal::Decimal;

use crate::error::DecodeError;

/// Scale of Nostra interest indices (1e18).
pub const WAD_SCALE: u32 = 18;

/// Scale of zkLend lending/debt accumulators (1e27).
pub const RAY_SCALE: u32 = 27;

/// Hex digits in a normalised address.
const ADDRESS_WIDTH: usize = 64;

/// Largest mantissa a `Decimal` can hold.
const DECIMAL_MANTISSA_BITS: usize = 96;

/// Parse a felt given as `0x`-prefixed hex or plain decimal.
pub fn parse_felt(value: &str) -> Result<U256, DecodeError> {
    let trimmed = value.trim();
    let invalid = || DecodeError::InvalidFelt {
        value: value.to_string(),
    };

    match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some("") => Err(invalid()),
        Some(hex) => U256::from_str_radix(hex, 16).map_err(|_| invalid()),
        None if trimmed.is_empty() => Err(invalid()),
        None => U256::from_str_radix(trimmed, 10).map_err(|_| invalid()),
    }
}

/// Lower 128 bits of a felt, or `Overflow` when it needs more than `max_bits`.
fn narrow(felt: U256, max_bits: usize, value: &str) -> Result<u128, DecodeError> {
    if felt.bit_len() > max_bits {
        return Err(DecodeError::Overflow {
            value: value.to_string(),
        });
    }
    let limbs = felt.as_limbs();
    Ok(limbs[0] as u128 | ((limbs[1] as u128) << 64))
}

/// Decode an integer amount.
pub fn to_decimal(value: &str) -> Result<Decimal, DecodeError> {
    to_scaled_decimal(value, 0)
}

/// Decode a fixed-point integer, dividing by `10^scale`.
///
/// The division is exact: the integer becomes the mantissa and `scale` the
/// decimal exponent.
pub fn to_scaled_decimal(value: &str, scale: u32) -> Result<Decimal, DecodeError> {
    let felt = parse_felt(value)?;
    let mantissa = narrow(felt, DECIMAL_MANTISSA_BITS, value)?;
    Decimal::try_from_i128_with_scale(mantissa as i128, scale).map_err(|_| DecodeError::Overflow {
        value: value.to_string(),
    })
}

/// Decode a small integer such as a loan id or debt category.
pub fn to_u64(value: &str) -> Result<u64, DecodeError> {
    let felt = parse_felt(value)?;
    Ok(narrow(felt, 64, value)? as u64)
}

/// Normalise an address to `0x` followed by 64 lowercase hex digits.
///
/// `0x436d...` and `0x00436d...` map to the same key.
pub fn add_leading_zeros(address: &str) -> Result<String, DecodeError> {
    let trimmed = address.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.len() > ADDRESS_WIDTH || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(DecodeError::InvalidFelt {
            value: address.to_string(),
        });
    }

    Ok(format!(
        "0x{:0>width$}",
        digits.to_ascii_lowercase(),
        width = ADDRESS_WIDTH
    ))
}
