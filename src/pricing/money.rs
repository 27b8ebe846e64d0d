//! Fixed-point money in integer cents.
//!
//! Every line item total is a `Money`, so sums never drift. `Decimal` is only
//! used while a rate is being scaled by a factor (miles, seasonal multiplier)
//! and the result is rounded back to cents exactly once.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

use super::calculators::round_money;

/// An amount of money stored as whole cents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Convert a decimal amount to cents using banker's rounding.
    ///
    /// Amounts outside the `i64` cent range saturate.
    pub fn from_decimal(amount: Decimal) -> Self {
        let cents = round_money(amount, 2) * Decimal::ONE_HUNDRED;
        let saturated = if amount.is_sign_negative() {
            i64::MIN
        } else {
            i64::MAX
        };
        Self(cents.to_i64().unwrap_or(saturated))
    }

    /// Display value with exactly two decimal places.
    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0, 2)
    }

    /// Multiply by a whole quantity.
    pub fn times(self, qty: u32) -> Self {
        Self(self.0.saturating_mul(i64::from(qty)))
    }

    /// Multiply by a decimal factor and round back to cents.
    pub fn scale(self, factor: Decimal) -> Self {
        Self::from_decimal(self.to_decimal() * factor)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        *self = *self + rhs;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.copied().sum()
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}
