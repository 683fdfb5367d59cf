//! Service catalog model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A service offered from the catalog. Quote lines may reference one; its
/// name is what ends up on converted invoices.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Service {
    pub service_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub base_price: Decimal,
    pub active: bool,
    pub created_utc: DateTime<Utc>,
}

/// Input for creating a catalog service.
#[derive(Debug, Clone)]
pub struct CreateService {
    pub name: String,
    pub description: Option<String>,
    pub base_price: Decimal,
    pub active: bool,
}

/// Filter parameters for listing catalog services.
#[derive(Debug, Clone, Default)]
pub struct ListServicesFilter {
    pub active_only: bool,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}
