//! Exact conversion between display amounts and integer base units
//!
//! Amounts are handled as digit strings end to end; no floating point is
//! involved anywhere. A display amount with more fractional digits than the
//! token's `decimals` is rejected rather than truncated.

use crate::error::AmountError;

use ethers::types::U256;

/// A syntactically valid, non-negative decimal amount, not yet scaled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayAmount {
    integer: String,
    fraction: String,
}

impl DisplayAmount {
    /// Parse `"10"`, `"10.5"`, `".5"` or `"5."`; surrounding whitespace is ignored
    pub fn parse(input: &str) -> Result<Self, AmountError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(AmountError::Empty);
        }
        if input.starts_with('-') {
            return Err(AmountError::Negative);
        }

        let (integer, fraction) = match input.split_once('.') {
            Some((integer, fraction)) => (integer, fraction),
            None => (input, ""),
        };

        let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(integer) || !all_digits(fraction) || (integer.is_empty() && fraction.is_empty())
        {
            return Err(AmountError::NotNumeric(input.to_string()));
        }

        Ok(Self {
            integer: integer.to_string(),
            fraction: fraction.trim_end_matches('0').to_string(),
        })
    }

    /// Scale by `10^decimals` exactly
    pub fn to_base_units(&self, decimals: u8) -> Result<U256, AmountError> {
        let decimals_len = usize::from(decimals);
        if self.fraction.len() > decimals_len {
            return Err(AmountError::TooManyDecimals {
                max: decimals,
                found: self.fraction.len(),
            });
        }

        let mut digits = String::with_capacity(self.integer.len() + decimals_len);
        digits.push_str(&self.integer);
        digits.push_str(&self.fraction);
        digits.extend(std::iter::repeat('0').take(decimals_len - self.fraction.len()));

        let digits = digits.trim_start_matches('0');
        if digits.is_empty() {
            return Ok(U256::zero());
        }

        U256::from_dec_str(digits).map_err(|_| AmountError::Overflow)
    }
}

/// Convert a display amount to base units in one step
pub fn to_base_units(amount: &str, decimals: u8) -> Result<U256, AmountError> {
    DisplayAmount::parse(amount)?.to_base_units(decimals)
}

/// Render base units as a display amount, trimming trailing zeros
pub fn format_base_units(amount: U256, decimals: u8) -> String {
    let digits = amount.to_string();
    let decimals = usize::from(decimals);
    if decimals == 0 {
        return digits;
    }

    let padded = if digits.len() <= decimals {
        format!("{}{}", "0".repeat(decimals - digits.len() + 1), digits)
    } else {
        digits
    };

    let (integer, fraction) = padded.split_at(padded.len() - decimals);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        integer.to_string()
    } else {
        format!("{}.{}", integer, fraction)
    }
}
