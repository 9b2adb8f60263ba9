//! Exact fixed-point money.
//!
//! Monetary values are stored as `i64` minor units (scale 2) and cross the
//! wire as decimal strings (`"12.34"`), never as binary floating point.
//! All arithmetic is checked integer arithmetic.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Currency code used when a record does not specify one.
pub const DEFAULT_CURRENCY: &str = "USD";

/// A monetary amount in minor units (scale 2).
///
/// `Amount::from_minor(500)` is `"5.00"`. Negative amounts are valid; they
/// appear in signed adjustments and refunds.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(i64);

impl Amount {
    /// Zero.
    pub const ZERO: Self = Self(0);

    /// Create an amount from minor units (cents).
    #[must_use]
    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    /// Create an amount from whole major units (dollars).
    ///
    /// Returns `None` on overflow.
    #[must_use]
    pub const fn from_major(major: i64) -> Option<Self> {
        match major.checked_mul(100) {
            Some(minor) => Some(Self(minor)),
            None => None,
        }
    }

    /// The amount in minor units.
    #[must_use]
    pub const fn minor_units(self) -> i64 {
        self.0
    }

    /// Whether the amount is strictly positive.
    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Checked addition.
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Checked subtraction.
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Checked multiplication by an integer quantity.
    ///
    /// Used to price `quantity` tokens at a per-token rate.
    #[must_use]
    pub const fn checked_mul(self, quantity: i64) -> Option<Self> {
        match self.0.checked_mul(quantity) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({self})")
    }
}

impl FromStr for Amount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AmountParseError::Empty);
        }

        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };

        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountParseError::Malformed);
        }
        if frac.len() > 2 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountParseError::Malformed);
        }

        let whole: i64 = whole.parse().map_err(|_| AmountParseError::OutOfRange)?;
        // "5.3" means 5.30, not 5.03
        let frac_minor: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| AmountParseError::Malformed)? * 10,
            _ => frac.parse().map_err(|_| AmountParseError::Malformed)?,
        };

        let minor = whole
            .checked_mul(100)
            .and_then(|w| w.checked_add(frac_minor))
            .ok_or(AmountParseError::OutOfRange)?;

        Ok(Self(if negative { -minor } else { minor }))
    }
}

impl TryFrom<String> for Amount {
    type Error = AmountParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Amount> for String {
    fn from(amount: Amount) -> Self {
        amount.to_string()
    }
}

/// Errors from parsing a decimal amount string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountParseError {
    /// The input was empty.
    #[error("empty amount")]
    Empty,

    /// The input is not a decimal number with at most two fraction digits.
    #[error("malformed decimal amount")]
    Malformed,

    /// The value does not fit in 64-bit minor units.
    #[error("amount out of range")]
    OutOfRange,
}
