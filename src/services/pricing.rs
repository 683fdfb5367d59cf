//! Monetary totals for quotes and invoices.
//!
//! All arithmetic runs at full `Decimal` precision and each stored field is
//! rounded exactly once at the end. The stored total is rebuilt from the
//! rounded components, so `total = subtotal - discount + tax` holds for the
//! values that land in the database.

use crate::error::AppError;
use crate::models::LineItemDraft;
use rust_decimal::{Decimal, RoundingStrategy};

const MONEY_SCALE: u32 = 2;
const ONE_HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Computed totals for a document header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentAmounts {
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
}

/// Round a monetary value to cents, midpoints away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Per-line total as stored on the item row.
pub fn line_total(quantity: Decimal, unit_price: Decimal) -> Decimal {
    round_money(quantity * unit_price)
}

/// Validate the drafts and compute header totals.
///
/// Discount applies to the subtotal; tax applies to the discounted amount.
pub fn compute_amounts(
    items: &[LineItemDraft],
    discount_pct: Decimal,
    tax_pct: Decimal,
) -> Result<DocumentAmounts, AppError> {
    validate_items(items)?;
    validate_pct(discount_pct, "discount")?;
    validate_pct(tax_pct, "tax")?;

    let subtotal: Decimal = items
        .iter()
        .map(|item| item.quantity * item.unit_price)
        .sum();
    let discount = subtotal * discount_pct / ONE_HUNDRED;
    let taxable = subtotal - discount;
    let tax = taxable * tax_pct / ONE_HUNDRED;

    let subtotal = round_money(subtotal);
    let discount_amount = round_money(discount);
    let tax_amount = round_money(tax);

    Ok(DocumentAmounts {
        subtotal,
        discount_amount,
        tax_amount,
        total_amount: subtotal - discount_amount + tax_amount,
    })
}

fn validate_items(items: &[LineItemDraft]) -> Result<(), AppError> {
    if items.is_empty() {
        return Err(AppError::Validation(anyhow::anyhow!(
            "A document requires at least one line item"
        )));
    }
    for (index, item) in items.iter().enumerate() {
        if item.quantity <= Decimal::ZERO {
            return Err(AppError::Validation(anyhow::anyhow!(
                "Line item {}: quantity must be positive",
                index + 1
            )));
        }
        if item.unit_price < Decimal::ZERO {
            return Err(AppError::Validation(anyhow::anyhow!(
                "Line item {}: unit price cannot be negative",
                index + 1
            )));
        }
    }
    Ok(())
}

fn validate_pct(value: Decimal, name: &str) -> Result<(), AppError> {
    if value < Decimal::ZERO || value > ONE_HUNDRED {
        return Err(AppError::Validation(anyhow::anyhow!(
            "The {} percentage must be between 0 and 100",
            name
        )));
    }
    Ok(())
}
