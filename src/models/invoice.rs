//! Invoice model for backoffice-service.

use crate::models::LineItemDraft;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice status. Overdue is derived from `due_date`, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "paid" => InvoiceStatus::Paid,
            "cancelled" => InvoiceStatus::Cancelled,
            _ => InvoiceStatus::Pending,
        }
    }
}

/// Invoice document header.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub customer_id: Uuid,
    /// Source quote when this invoice came out of a conversion.
    pub quote_id: Option<Uuid>,
    pub status: String,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub subtotal: Decimal,
    pub discount_pct: Decimal,
    pub discount_amount: Decimal,
    pub tax_pct: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub due_date: Option<NaiveDate>,
    pub paid_date: Option<NaiveDate>,
    pub payment_method: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Invoice {
    /// A pending invoice past its due date is overdue.
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.status == InvoiceStatus::Pending.as_str()
            && self.due_date.map(|due| due < today).unwrap_or(false)
    }
}

/// Invoice line item. Lines are denormalized snapshots; `service_name` is
/// the label resolved when the line was written.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceItem {
    pub invoice_item_id: Uuid,
    pub invoice_id: Uuid,
    pub service_name: String,
    pub description: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total_price: Decimal,
    pub sort_order: i32,
    pub created_utc: DateTime<Utc>,
}

/// Invoice with its line items, customer identity, and source quote number.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDetail {
    pub invoice: Invoice,
    pub customer_name: String,
    pub customer_email: String,
    pub quote_number: Option<String>,
    pub items: Vec<InvoiceItem>,
    pub is_overdue: bool,
}

/// Input for creating a standalone invoice.
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub customer_id: Uuid,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub discount_pct: Decimal,
    pub tax_pct: Decimal,
    pub due_date: Option<NaiveDate>,
    /// Every draft requires a non-empty `service_name`.
    pub items: Vec<LineItemDraft>,
}

/// Input for updating a pending invoice. `None` header fields keep their
/// current value; `items` replaces the full line item set.
#[derive(Debug, Clone)]
pub struct UpdateInvoice {
    pub description: Option<String>,
    pub notes: Option<String>,
    pub discount_pct: Option<Decimal>,
    pub tax_pct: Option<Decimal>,
    pub due_date: Option<NaiveDate>,
    pub items: Vec<LineItemDraft>,
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone, Default)]
pub struct ListInvoicesFilter {
    pub status: Option<InvoiceStatus>,
    pub customer_id: Option<Uuid>,
    pub overdue_only: bool,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}

/// Aggregated invoice figures.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct InvoiceStats {
    pub total_invoices: i64,
    pub pending_count: i64,
    pub paid_count: i64,
    pub cancelled_count: i64,
    pub overdue_count: i64,
    pub total_value: Decimal,
    pub paid_value: Decimal,
    pub outstanding_value: Decimal,
    pub overdue_value: Decimal,
    pub average_value: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn invoice_with(status: InvoiceStatus, due_date: Option<NaiveDate>) -> Invoice {
        Invoice {
            invoice_id: Uuid::new_v4(),
            invoice_number: "INV0001".to_string(),
            customer_id: Uuid::new_v4(),
            quote_id: None,
            status: status.as_str().to_string(),
            description: None,
            notes: None,
            subtotal: Decimal::from_str("100.00").unwrap(),
            discount_pct: Decimal::ZERO,
            discount_amount: Decimal::ZERO,
            tax_pct: Decimal::from_str("21").unwrap(),
            tax_amount: Decimal::from_str("21.00").unwrap(),
            total_amount: Decimal::from_str("121.00").unwrap(),
            due_date,
            paid_date: None,
            payment_method: None,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    #[test]
    fn test_pending_past_due_is_overdue() {
        let due = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        assert!(invoice_with(InvoiceStatus::Pending, Some(due)).is_overdue(today));
    }

    #[test]
    fn test_due_today_is_not_overdue() {
        let due = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert!(!invoice_with(InvoiceStatus::Pending, Some(due)).is_overdue(due));
    }

    #[test]
    fn test_paid_or_cancelled_never_overdue() {
        let due = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        assert!(!invoice_with(InvoiceStatus::Paid, Some(due)).is_overdue(today));
        assert!(!invoice_with(InvoiceStatus::Cancelled, Some(due)).is_overdue(today));
    }

    #[test]
    fn test_missing_due_date_is_not_overdue() {
        let today = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        assert!(!invoice_with(InvoiceStatus::Pending, None).is_overdue(today));
    }
}
