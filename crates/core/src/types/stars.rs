//! Telegram Stars amounts and the conversion from shop prices.
//!
//! Product prices are kept as decimal amounts in the shop currency. Invoices
//! are issued in Stars (`XTR`), which only accept whole units, so every
//! conversion rounds up.

use core::fmt;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Currency code Telegram uses for Stars payments.
pub const STARS_CURRENCY: &str = "XTR";

/// Errors that can occur when building a [`StarRate`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StarRateError {
    /// The rate is zero or negative.
    #[error("star rate must be positive, got {0}")]
    NotPositive(Decimal),
    /// The string is not a decimal number.
    #[error("star rate is not a decimal number: {0}")]
    Invalid(String),
}

/// Price of one star in the shop currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct StarRate(Decimal);

impl StarRate {
    /// Build a rate, rejecting zero and negative values.
    ///
    /// # Errors
    ///
    /// Returns [`StarRateError::NotPositive`] if `rate <= 0`.
    pub fn new(rate: Decimal) -> Result<Self, StarRateError> {
        if rate <= Decimal::ZERO {
            return Err(StarRateError::NotPositive(rate));
        }
        Ok(Self(rate))
    }

    /// The rate as a decimal.
    #[must_use]
    pub const fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Convert a price into the number of stars to invoice.
    ///
    /// Rounds up and never returns less than one star, since Telegram rejects
    /// zero-amount invoices.
    #[must_use]
    pub fn to_stars(&self, total: Decimal) -> StarAmount {
        let stars = (total / self.0).ceil().to_i64().unwrap_or(i64::MAX);
        StarAmount(stars.max(1))
    }
}

impl Default for StarRate {
    fn default() -> Self {
        // 2.015 currency units per star
        Self(Decimal::new(2015, 3))
    }
}

impl TryFrom<Decimal> for StarRate {
    type Error = StarRateError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StarRate> for Decimal {
    fn from(rate: StarRate) -> Self {
        rate.0
    }
}

impl core::str::FromStr for StarRate {
    type Err = StarRateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rate: Decimal = s
            .trim()
            .parse()
            .map_err(|_| StarRateError::Invalid(s.to_owned()))?;
        Self::new(rate)
    }
}

impl fmt::Display for StarRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A whole number of Telegram Stars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StarAmount(i64);

impl StarAmount {
    /// Wrap a raw star count.
    #[must_use]
    pub const fn new(stars: i64) -> Self {
        Self(stars)
    }

    /// The raw star count.
    #[must_use]
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for StarAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} XTR", self.0)
    }
}
