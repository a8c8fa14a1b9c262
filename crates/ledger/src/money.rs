use std::fmt;

use serde::{Deserialize, Serialize};

/// Money amount represented as **integer minor units** (2 fraction digits).
///
/// Use this type for all monetary values in the ledger to avoid
/// floating-point drift. The currency code travels separately as a plain
/// string, because debts keep whatever code the message mentioned.
///
/// # Examples
///
/// ```rust
/// use ledger::Money;
///
/// let amount = Money::new(50_000_00);
/// assert_eq!(amount.minor(), 5_000_000);
/// assert_eq!(amount.to_string(), "50000.00");
/// assert_eq!(amount.grouped(), "50,000.00");
/// ```
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    /// Creates a new amount from integer minor units.
    #[must_use]
    pub const fn new(minor: i64) -> Self {
        Self(minor)
    }

    /// Returns the raw value in minor units.
    #[must_use]
    pub const fn minor(self) -> i64 {
        self.0
    }

    /// Returns `true` if the amount is positive.
    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Converts a major-unit value into minor units, rounding to 2 decimals.
    ///
    /// Returns `None` for non-finite values and values outside the `i64`
    /// minor-unit range.
    #[must_use]
    pub fn from_major_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let minor = (value * 100.0).round();
        if minor < i64::MIN as f64 || minor > i64::MAX as f64 {
            return None;
        }
        Some(Self(minor as i64))
    }

    /// Checked addition (returns `None` on overflow).
    #[must_use]
    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    /// Formats the amount with thousands separators, e.g. `50,000.00`.
    #[must_use]
    pub fn grouped(self) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let units = abs / 100;
        let cents = abs % 100;

        let mut digits = units.to_string();
        let mut tail = String::new();
        while digits.len() > 3 {
            let group = digits.split_off(digits.len() - 3);
            tail = format!(",{group}{tail}");
        }
        format!("{sign}{digits}{tail}.{cents:02}")
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let units = abs / 100;
        let cents = abs % 100;
        write!(f, "{sign}{units}.{cents:02}")
    }
}

impl From<i64> for Money {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Money> for i64 {
    fn from(value: Money) -> Self {
        value.0
    }
}
