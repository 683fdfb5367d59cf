//! Customer model for backoffice-service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Customer record. Documents reference customers by id; deleting a customer
/// with documents is refused at the database layer.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Customer {
    pub customer_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Customer {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Input for creating a customer.
#[derive(Debug, Clone)]
pub struct CreateCustomer {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub notes: Option<String>,
}

/// Input for updating a customer. `None` fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct UpdateCustomer {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub notes: Option<String>,
}

/// Filter parameters for listing customers.
#[derive(Debug, Clone, Default)]
pub struct ListCustomersFilter {
    /// Case-insensitive substring match against name and email.
    pub search: Option<String>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}
