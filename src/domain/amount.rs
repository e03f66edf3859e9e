use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An exact decimal monetary value.
///
/// Amounts are never represented as binary floating point: sums must
/// reconcile digit for digit. The scale produced by arithmetic is kept, so
/// `1000.00 - 50.00` formats as `950.00`. Equality is numeric, so `1.0` and
/// `1.00` compare equal.
///
/// Arithmetic is checked for exactness as well as range: a result that
/// needs more than 28 significant digits is `None`, never rounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(#[serde(with = "rust_decimal::serde::str")] Decimal);

impl Amount {
    pub const ZERO: Amount = Amount(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    /// Parse a textual amount such as `"50"`, `"12.50"` or `"-100.00"`.
    ///
    /// Surrounding whitespace is ignored. Exponents, digit separators,
    /// `NaN`/`inf` and values that cannot be held without rounding are
    /// rejected.
    pub fn parse(input: &str) -> Result<Self, ParseAmountError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseAmountError::Empty);
        }

        let (negative, unsigned) = match input.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, input.strip_prefix('+').unwrap_or(input)),
        };

        let (units, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
        let is_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
        if !is_digits(units) || !is_digits(fraction) || (units.is_empty() && fraction.is_empty()) {
            return Err(ParseAmountError::InvalidFormat(input.to_string()));
        }

        // Canonical form for the decimal parser: "-0.50" rather than "-.50", "5" rather than "5."
        let mut canonical = String::with_capacity(unsigned.len() + 2);
        if negative {
            canonical.push('-');
        }
        canonical.push_str(if units.is_empty() { "0" } else { units });
        if !fraction.is_empty() {
            canonical.push('.');
            canonical.push_str(fraction);
        }

        Decimal::from_str_exact(&canonical)
            .map(Amount)
            .map_err(|_| ParseAmountError::OutOfRange(input.to_string()))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Strictly greater than zero.
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.exact(rhs, self.0.checked_add(rhs.0)?)
    }

    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.exact(rhs, self.0.checked_sub(rhs.0)?)
    }

    /// `Decimal` rounds away fractional digits when a result outgrows its
    /// mantissa. The exact result never needs more decimal places than the
    /// operands without trailing zeros, so a result with fewer was rounded.
    fn exact(self, rhs: Amount, result: Decimal) -> Option<Amount> {
        let needed = self.0.normalize().scale().max(rhs.0.normalize().scale());
        (result.scale() >= needed).then_some(Amount(result))
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl FromStr for Amount {
    type Err = ParseAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Amount::parse(s)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseAmountError {
    Empty,
    InvalidFormat(String),
    OutOfRange(String),
}

impl fmt::Display for ParseAmountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseAmountError::Empty => write!(f, "amount is empty"),
            ParseAmountError::InvalidFormat(s) => write!(f, "'{}' is not a decimal number", s),
            ParseAmountError::OutOfRange(s) => {
                write!(f, "'{}' cannot be represented exactly", s)
            }
        }
    }
}

impl std::error::Error for ParseAmountError {}
