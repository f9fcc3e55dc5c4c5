//! Lot/tick size rounding.
//!
//! Values go through `Decimal` so that a rounded quantity such as `0.123` is
//! transmitted as exactly `"0.123"` and never as `0.12300000000000001` or in
//! exponent notation.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

fn to_decimal(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    // f64 Display never uses exponent notation and is the shortest round-trip form
    Decimal::from_str(&value.to_string()).ok()
}

/// Round `value` to the nearest multiple of `step`
pub fn round_to_step(value: f64, step: f64) -> Option<Decimal> {
    let value = to_decimal(value)?;
    let step = to_decimal(step)?;
    if step <= Decimal::ZERO {
        return None;
    }

    let multiples = (value / step).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    Some((multiples * step).normalize())
}

pub fn round_to_step_f64(value: f64, step: f64) -> Option<f64> {
    round_to_step(value, step)?.to_f64()
}

/// Round to `step` and render as a plain decimal string
pub fn format_to_step(value: f64, step: f64) -> Option<String> {
    round_to_step(value, step).map(|d| d.to_string())
}

/// Number of decimals implied by a step size (`0.001` -> 3, `0.5` -> 1, `1` -> 0)
pub fn step_decimals(step: f64) -> u32 {
    to_decimal(step).map(|d| d.normalize().scale()).unwrap_or(0)
}
