//! Line item input shared by the quote and invoice builders.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caller-supplied line item, before totals are computed.
///
/// Quote lines reference the service catalog through `service_id` (free-form
/// lines carry only a description). Invoice lines are denormalized snapshots
/// and carry their label in `service_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItemDraft {
    pub service_id: Option<Uuid>,
    pub service_name: Option<String>,
    pub description: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}
