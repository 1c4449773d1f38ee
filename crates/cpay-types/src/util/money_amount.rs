//! Human-readable BTC amount parsing.
//!
//! This module provides [`MoneyAmount`], a type for parsing human-readable
//! amount strings into precise decimal values, and for converting them to
//! integer satoshis without floating point drift.
//!
//! # Supported Formats
//!
//! - Plain numbers: `"1"`, `"0.001"`
//! - With currency symbols or tickers: `"₿0.5"`, `"0.5 BTC"`
//! - With thousand separators: `"1,000.5"`
//!
//! # Example
//!
//! ```rust
//! use cpay_types::util::MoneyAmount;
//!
//! let amount = MoneyAmount::parse("0.001 BTC").unwrap();
//! assert_eq!(amount.to_satoshis().unwrap().to_sat(), 100_000);
//! ```

use bitcoin::Amount;
use regex::Regex;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::LazyLock;

/// Number of decimal places of one BTC expressed in satoshis.
pub const BTC_DECIMALS: u32 = 8;

/// A parsed BTC amount with decimal precision.
///
/// The value is kept as a [`Decimal`] until it is converted to satoshis with
/// [`MoneyAmount::to_satoshis`], which rounds half away from zero to
/// [`BTC_DECIMALS`] places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MoneyAmount(pub Decimal);

/// Errors that can occur when parsing or converting a monetary amount.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum MoneyAmountParseError {
    /// The input string could not be parsed as a number.
    #[error("Invalid number format")]
    InvalidFormat,
    /// The value is outside the allowed range.
    #[error(
        "Amount must be between {} and {}",
        constants::MIN_STR,
        constants::MAX_STR
    )]
    OutOfRange,
    /// Negative values are not allowed.
    #[error("Negative value is not allowed")]
    Negative,
}

mod constants {
    use super::*;

    pub const MIN_STR: &str = "0.00000001";
    pub const MAX_STR: &str = "21000000";

    pub static MIN: LazyLock<Decimal> =
        LazyLock::new(|| Decimal::from_str(MIN_STR).expect("valid decimal"));
    pub static MAX: LazyLock<Decimal> =
        LazyLock::new(|| Decimal::from_str(MAX_STR).expect("valid decimal"));
    pub static SATS_PER_BTC: LazyLock<Decimal> =
        LazyLock::new(|| Decimal::from(100_000_000u64));
}

static NON_NUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\d\.\-]+").expect("valid regex"));

impl MoneyAmount {
    /// Parses a human-readable amount string into a [`MoneyAmount`].
    ///
    /// Currency symbols, tickers, thousand separators, and whitespace are
    /// stripped before parsing. The result must be a non-negative number
    /// within the allowed range.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The string cannot be parsed as a number
    /// - The value is negative
    /// - The value is outside the allowed range
    pub fn parse(input: &str) -> Result<Self, MoneyAmountParseError> {
        let cleaned = NON_NUMERIC.replace_all(input, "").to_string();

        let parsed =
            Decimal::from_str(&cleaned).map_err(|_| MoneyAmountParseError::InvalidFormat)?;

        Self::try_from(parsed)
    }

    /// Returns the number of decimal places in the original input.
    pub fn scale(&self) -> u32 {
        self.0.scale()
    }

    /// Converts the amount to whole satoshis.
    ///
    /// Sub-satoshi precision is rounded half away from zero. An amount that
    /// rounds down to zero satoshis is rejected.
    pub fn to_satoshis(&self) -> Result<Amount, MoneyAmountParseError> {
        let sats = (self.0 * *constants::SATS_PER_BTC)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_u64()
            .ok_or(MoneyAmountParseError::OutOfRange)?;
        if sats == 0 {
            return Err(MoneyAmountParseError::OutOfRange);
        }
        Ok(Amount::from_sat(sats))
    }

    /// Builds a decimal BTC amount from satoshis.
    pub fn from_satoshis(amount: Amount) -> Self {
        MoneyAmount(Decimal::from(amount.to_sat()) / *constants::SATS_PER_BTC)
    }
}

impl TryFrom<Decimal> for MoneyAmount {
    type Error = MoneyAmountParseError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        if value.is_sign_negative() {
            return Err(MoneyAmountParseError::Negative);
        }
        // Values below the minimum may still round up to one satoshi.
        let rounded =
            value.round_dp_with_strategy(BTC_DECIMALS, RoundingStrategy::MidpointAwayFromZero);
        if rounded < *constants::MIN || rounded > *constants::MAX {
            return Err(MoneyAmountParseError::OutOfRange);
        }
        Ok(MoneyAmount(value))
    }
}

impl FromStr for MoneyAmount {
    type Err = MoneyAmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MoneyAmount::parse(s)
    }
}

impl TryFrom<&str> for MoneyAmount {
    type Error = MoneyAmountParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        MoneyAmount::from_str(value)
    }
}

impl TryFrom<f64> for MoneyAmount {
    type Error = MoneyAmountParseError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        let decimal = Decimal::from_f64(value).ok_or(MoneyAmountParseError::OutOfRange)?;
        Self::try_from(decimal)
    }
}

impl From<Amount> for MoneyAmount {
    fn from(value: Amount) -> Self {
        MoneyAmount::from_satoshis(value)
    }
}

impl Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        let amount = MoneyAmount::parse("0.001").unwrap();
        assert_eq!(amount.to_satoshis().unwrap(), Amount::from_sat(100_000));
    }

    #[test]
    fn test_parse_with_ticker_and_separators() {
        let amount = MoneyAmount::parse("1,000.5 BTC").unwrap();
        assert_eq!(amount.to_satoshis().unwrap().to_sat(), 100_050_000_000);
    }

    #[test]
    fn test_sub_satoshi_rounds_half_away_from_zero() {
        let amount = MoneyAmount::parse("0.000000015").unwrap();
        assert_eq!(amount.to_satoshis().unwrap().to_sat(), 2);
        let amount = MoneyAmount::parse("0.000000014").unwrap();
        assert_eq!(amount.to_satoshis().unwrap().to_sat(), 1);
    }

    #[test]
    fn test_rejects_zero_and_negative() {
        assert_eq!(
            MoneyAmount::parse("0"),
            Err(MoneyAmountParseError::OutOfRange)
        );
        assert_eq!(
            MoneyAmount::parse("-1"),
            Err(MoneyAmountParseError::Negative)
        );
        assert_eq!(
            MoneyAmount::parse("0.000000004"),
            Err(MoneyAmountParseError::OutOfRange)
        );
    }

    #[test]
    fn test_rejects_above_supply() {
        assert_eq!(
            MoneyAmount::parse("21000000.00000001"),
            Err(MoneyAmountParseError::OutOfRange)
        );
    }

    #[test]
    fn test_invalid_format() {
        assert_eq!(
            MoneyAmount::parse("abc"),
            Err(MoneyAmountParseError::InvalidFormat)
        );
    }

    #[test]
    fn test_from_satoshis_display() {
        let amount = MoneyAmount::from_satoshis(Amount::from_sat(150_000));
        assert_eq!(amount.to_string(), "0.0015");
    }
}
