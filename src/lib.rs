//! Backoffice Service - Quotes, invoices, and warranty certificates over PostgreSQL.

pub mod config;
pub mod error;
pub mod models;
pub mod observability;
pub mod services;
