//! Services module for backoffice-service.

pub mod database;
pub mod metrics;
pub mod pricing;
pub mod sequence;

pub use database::Database;
pub use metrics::{get_metrics, init_metrics};
pub use pricing::{compute_amounts, DocumentAmounts};
pub use sequence::DocumentKind;
