//! Quote model for backoffice-service.

use crate::models::LineItemDraft;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Quote status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    Draft,
    Sent,
    Accepted,
    Rejected,
    Expired,
    Converted,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteStatus::Draft => "draft",
            QuoteStatus::Sent => "sent",
            QuoteStatus::Accepted => "accepted",
            QuoteStatus::Rejected => "rejected",
            QuoteStatus::Expired => "expired",
            QuoteStatus::Converted => "converted",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "sent" => QuoteStatus::Sent,
            "accepted" => QuoteStatus::Accepted,
            "rejected" => QuoteStatus::Rejected,
            "expired" => QuoteStatus::Expired,
            "converted" => QuoteStatus::Converted,
            _ => QuoteStatus::Draft,
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    /// `Accepted -> Converted` is legal but reserved for the converter.
    pub fn can_transition_to(&self, next: QuoteStatus) -> bool {
        matches!(
            (self, next),
            (QuoteStatus::Draft, QuoteStatus::Sent)
                | (QuoteStatus::Sent, QuoteStatus::Accepted)
                | (QuoteStatus::Sent, QuoteStatus::Rejected)
                | (QuoteStatus::Sent, QuoteStatus::Expired)
                | (QuoteStatus::Accepted, QuoteStatus::Converted)
        )
    }

    /// Header and line items may only change before the customer accepts;
    /// conversion copies the financials verbatim afterwards.
    pub fn is_editable(&self) -> bool {
        matches!(self, QuoteStatus::Draft | QuoteStatus::Sent)
    }
}

/// Quote document header.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Quote {
    pub quote_id: Uuid,
    pub quote_number: String,
    pub customer_id: Uuid,
    pub status: String,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub subtotal: Decimal,
    pub discount_pct: Decimal,
    pub discount_amount: Decimal,
    pub tax_pct: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub valid_until: Option<NaiveDate>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Quote line item.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QuoteItem {
    pub quote_item_id: Uuid,
    pub quote_id: Uuid,
    pub service_id: Option<Uuid>,
    pub description: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total_price: Decimal,
    pub sort_order: i32,
    pub created_utc: DateTime<Utc>,
}

/// Quote with its line items and customer identity.
#[derive(Debug, Clone, Serialize)]
pub struct QuoteDetail {
    pub quote: Quote,
    pub customer_name: String,
    pub customer_email: String,
    pub items: Vec<QuoteItem>,
}

/// Input for creating a quote.
#[derive(Debug, Clone)]
pub struct CreateQuote {
    pub customer_id: Uuid,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub discount_pct: Decimal,
    pub tax_pct: Decimal,
    pub valid_until: Option<NaiveDate>,
    pub items: Vec<LineItemDraft>,
}

/// Input for updating a quote. `None` header fields keep their current
/// value; `items` replaces the full line item set.
#[derive(Debug, Clone)]
pub struct UpdateQuote {
    pub description: Option<String>,
    pub notes: Option<String>,
    pub discount_pct: Option<Decimal>,
    pub tax_pct: Option<Decimal>,
    pub valid_until: Option<NaiveDate>,
    pub items: Vec<LineItemDraft>,
}

/// Filter parameters for listing quotes.
#[derive(Debug, Clone, Default)]
pub struct ListQuotesFilter {
    pub status: Option<QuoteStatus>,
    pub customer_id: Option<Uuid>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}

/// Aggregated quote figures.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct QuoteStats {
    pub total_quotes: i64,
    pub draft_count: i64,
    pub sent_count: i64,
    pub accepted_count: i64,
    pub rejected_count: i64,
    pub expired_count: i64,
    pub converted_count: i64,
    pub total_value: Decimal,
    pub accepted_value: Decimal,
    pub average_value: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_follows_draft_sent_accepted() {
        assert!(QuoteStatus::Draft.can_transition_to(QuoteStatus::Sent));
        assert!(QuoteStatus::Sent.can_transition_to(QuoteStatus::Accepted));
        assert!(QuoteStatus::Sent.can_transition_to(QuoteStatus::Rejected));
        assert!(QuoteStatus::Sent.can_transition_to(QuoteStatus::Expired));
        assert!(QuoteStatus::Accepted.can_transition_to(QuoteStatus::Converted));
    }

    #[test]
    fn test_no_skipping_or_reversing() {
        assert!(!QuoteStatus::Draft.can_transition_to(QuoteStatus::Accepted));
        assert!(!QuoteStatus::Draft.can_transition_to(QuoteStatus::Converted));
        assert!(!QuoteStatus::Accepted.can_transition_to(QuoteStatus::Sent));
        assert!(!QuoteStatus::Rejected.can_transition_to(QuoteStatus::Accepted));
        assert!(!QuoteStatus::Converted.can_transition_to(QuoteStatus::Draft));
    }

    #[test]
    fn test_editable_only_before_acceptance() {
        assert!(QuoteStatus::Draft.is_editable());
        assert!(QuoteStatus::Sent.is_editable());
        assert!(!QuoteStatus::Accepted.is_editable());
        assert!(!QuoteStatus::Converted.is_editable());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            QuoteStatus::Draft,
            QuoteStatus::Sent,
            QuoteStatus::Accepted,
            QuoteStatus::Rejected,
            QuoteStatus::Expired,
            QuoteStatus::Converted,
        ] {
            assert_eq!(QuoteStatus::from_string(status.as_str()), status);
        }
        assert_eq!(QuoteStatus::from_string("unknown"), QuoteStatus::Draft);
    }
}
