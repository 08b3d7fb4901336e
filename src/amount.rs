/// Fixed-point amount codec
///
/// Converts between human-entered decimal strings ("12.50") and the
/// settlement token's integer minor units. All money crossing an inbound or
/// outbound boundary goes through here.

use crate::error::{CoreError, CoreResult};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Largest decimal count supported (18 = typical EVM token precision).
pub const MAX_TOKEN_DECIMALS: u32 = 18;

/// Digits always rendered after the decimal point.
pub const DISPLAY_FRACTION_DIGITS: u32 = 2;

/// Codec bound to a token's fixed decimal count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountCodec {
    decimals: u32,
}

impl AmountCodec {
    pub fn new(decimals: u32) -> CoreResult<Self> {
        if decimals > MAX_TOKEN_DECIMALS {
            return Err(CoreError::Config(format!(
                "token decimals {} exceeds supported maximum {}",
                decimals, MAX_TOKEN_DECIMALS
            )));
        }
        Ok(Self { decimals })
    }

    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    /// One whole token in minor units.
    pub fn one(&self) -> u128 {
        10u128.pow(self.decimals)
    }

    /// Parse a user-entered decimal amount.
    ///
    /// Rejects non-numeric and negative input, and input with more
    /// significant fractional digits than the token carries. Trailing zeros
    /// beyond the token's precision are accepted since nothing is lost.
    pub fn to_minor_units(&self, input: &str) -> CoreResult<u128> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidAmount("amount is empty".to_string()));
        }

        let value = Decimal::from_str(trimmed)
            .map_err(|_| CoreError::InvalidAmount(format!("'{}' is not a number", trimmed)))?;

        if value.is_sign_negative() && !value.is_zero() {
            return Err(CoreError::InvalidAmount(format!("'{}' is negative", trimmed)));
        }

        let value = value.normalize();
        let scale = value.scale();
        if scale > self.decimals {
            return Err(CoreError::InvalidAmount(format!(
                "'{}' has {} fractional digits, token supports {}",
                trimmed, scale, self.decimals
            )));
        }

        value
            .mantissa()
            .unsigned_abs()
            .checked_mul(10u128.pow(self.decimals - scale))
            .ok_or_else(|| CoreError::InvalidAmount(format!("'{}' is out of range", trimmed)))
    }

    /// Render minor units with exactly two fractional digits (truncating).
    pub fn to_display_string(&self, minor: u128) -> String {
        let unit = self.one();
        let whole = minor / unit;
        let fraction = minor % unit;

        let cents = if self.decimals >= DISPLAY_FRACTION_DIGITS {
            fraction / 10u128.pow(self.decimals - DISPLAY_FRACTION_DIGITS)
        } else {
            fraction * 10u128.pow(DISPLAY_FRACTION_DIGITS - self.decimals)
        };

        format!("{}.{:02}", whole, cents)
    }

    /// Exact decimal value of a minor-unit amount, for JSON responses.
    pub fn to_decimal(&self, minor: u128) -> Decimal {
        match i128::try_from(minor) {
            Ok(m) => Decimal::try_from_i128_with_scale(m, self.decimals)
                .unwrap_or(Decimal::MAX),
            Err(_) => Decimal::MAX,
        }
    }
}
