//! Authoritative money arithmetic.
//!
//! Every stored total is produced here from catalog prices, the tenant tax
//! rate and the tip. Nothing a client sends is trusted except the tip.

use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

use crate::entities::order::LineItem;
use crate::error::EngineError;

pub const MAX_LINE_ITEMS: usize = 100;
pub const MAX_QUANTITY: u32 = 999;
/// 100 000.00
pub const MAX_TIP: Decimal = Decimal::from_parts(10_000_000, 0, 0, false, 2);
/// Largest amount a `NUMERIC(12, 2)` column holds.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_327, 232, 0, false, 2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("order total exceeds the storable range")]
pub struct AmountOutOfRange;

impl From<AmountOutOfRange> for EngineError {
    fn from(error: AmountOutOfRange) -> Self {
        EngineError::validation(error.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub tip: Decimal,
    pub total: Decimal,
}

/// Round to cents, half away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// A tip is accepted when it is between zero and [`MAX_TIP`].
pub fn validate_tip(tip: Decimal) -> Result<(), EngineError> {
    if tip < Decimal::ZERO {
        return Err(EngineError::validation("tip cannot be negative"));
    }
    if tip > MAX_TIP {
        return Err(EngineError::validation(format!(
            "tip cannot exceed {MAX_TIP}"
        )));
    }
    Ok(())
}

pub fn compute_totals(
    items: &[LineItem],
    tax_rate: Decimal,
    tip: Decimal,
) -> Result<Totals, AmountOutOfRange> {
    let mut subtotal = Decimal::ZERO;
    for item in items {
        subtotal = subtotal
            .checked_add(item.checked_line_total().ok_or(AmountOutOfRange)?)
            .ok_or(AmountOutOfRange)?;
    }
    let subtotal = round_money(subtotal);
    let tax = round_money(subtotal.checked_mul(tax_rate).ok_or(AmountOutOfRange)?);
    let tip = round_money(tip);
    let total = subtotal
        .checked_add(tax)
        .and_then(|sum| sum.checked_add(tip))
        .filter(|total| *total <= MAX_AMOUNT)
        .ok_or(AmountOutOfRange)?;
    Ok(Totals {
        subtotal,
        tax,
        tip,
        total,
    })
}
