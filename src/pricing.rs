//! Billable-day counting and fixed-point money arithmetic.
//!
//! Every multiplication and addition is rounded to two places, midpoint away
//! from zero, so totals built line by line never drift.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::model::DateWindow;

const SCALE: u32 = 2;

/// Calendar days billed for a window, never less than one.
pub fn billable_days(window: &DateWindow) -> u32 {
    u32::try_from(window.days_between()).unwrap_or(u32::MAX).max(1)
}

pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero)
}

pub fn mul(value: Decimal, factor: u32) -> Decimal {
    round2(value * Decimal::from(factor))
}

pub fn add(a: Decimal, b: Decimal) -> Decimal {
    round2(a + b)
}

/// `unit × quantity × days`, rounded after each step.
pub fn line_rental(unit_price: Decimal, quantity: u32, days: u32) -> Decimal {
    mul(mul(unit_price, quantity), days)
}

pub fn line_deposit(unit_deposit: Decimal, quantity: u32) -> Decimal {
    mul(unit_deposit, quantity)
}

/// Zero with the two-place scale, so totals print as `0.00`.
pub fn zero() -> Decimal {
    Decimal::new(0, SCALE)
}
