//! Warranty certificate model.

use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Warranty certificate issued after a completed job.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Certificate {
    pub certificate_id: Uuid,
    pub certificate_number: String,
    pub customer_id: Uuid,
    pub service_type: String,
    pub service_description: Option<String>,
    pub vehicle_info: Option<String>,
    pub service_date: NaiveDate,
    pub products_used: Option<String>,
    pub warranty_period_months: Option<i32>,
    pub warranty_end_date: Option<NaiveDate>,
    pub special_notes: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Certificate {
    /// Warranty end as calendar months after the service date. Day-of-month
    /// is clamped at month ends (Jan 31 + 1 month = Feb 28/29).
    pub fn warranty_end(service_date: NaiveDate, period_months: i32) -> Option<NaiveDate> {
        if period_months <= 0 {
            return None;
        }
        service_date.checked_add_months(Months::new(period_months as u32))
    }
}

/// Certificate with its customer identity.
#[derive(Debug, Clone, Serialize)]
pub struct CertificateDetail {
    pub certificate: Certificate,
    pub customer_name: String,
}

/// Input for creating a certificate.
#[derive(Debug, Clone)]
pub struct CreateCertificate {
    pub customer_id: Uuid,
    pub service_type: String,
    pub service_description: Option<String>,
    pub vehicle_info: Option<String>,
    pub service_date: NaiveDate,
    pub products_used: Option<String>,
    pub warranty_period_months: Option<i32>,
    pub special_notes: Option<String>,
}

/// Input for updating a certificate. `None` fields keep their current value;
/// the warranty end date is recomputed when the date or period changes.
#[derive(Debug, Clone, Default)]
pub struct UpdateCertificate {
    pub service_type: Option<String>,
    pub service_description: Option<String>,
    pub vehicle_info: Option<String>,
    pub service_date: Option<NaiveDate>,
    pub products_used: Option<String>,
    pub warranty_period_months: Option<i32>,
    pub special_notes: Option<String>,
}

/// Filter parameters for listing certificates.
#[derive(Debug, Clone, Default)]
pub struct ListCertificatesFilter {
    pub customer_id: Option<Uuid>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warranty_end_adds_calendar_months() {
        let service_date = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        assert_eq!(
            Certificate::warranty_end(service_date, 12),
            Some(NaiveDate::from_ymd_opt(2027, 3, 15).unwrap())
        );
    }

    #[test]
    fn test_warranty_end_clamps_month_end() {
        let service_date = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();
        assert_eq!(
            Certificate::warranty_end(service_date, 1),
            Some(NaiveDate::from_ymd_opt(2026, 2, 28).unwrap())
        );
    }

    #[test]
    fn test_warranty_end_rejects_non_positive_period() {
        let service_date = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        assert_eq!(Certificate::warranty_end(service_date, 0), None);
        assert_eq!(Certificate::warranty_end(service_date, -6), None);
    }
}
