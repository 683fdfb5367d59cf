use crate::error::AppError;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct BackofficeConfig {
    pub service_name: String,
    pub log_level: String,
    pub port: u16,
    pub database: DatabaseConfig,
    pub documents: DocumentsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Business defaults applied when a caller leaves them unspecified.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentsConfig {
    /// Days between a quote's creation date and the due date of the invoice
    /// it converts into.
    pub payment_term_days: u32,
    /// Tax percentage applied when a document does not carry its own.
    pub default_tax_pct: Decimal,
}

impl BackofficeConfig {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        Ok(BackofficeConfig {
            service_name: get_env("SERVICE_NAME", Some("backoffice-service"), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            port: parse_env("PORT", Some("8080"), is_prod)?,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", Some("1"), is_prod)?,
            },
            documents: DocumentsConfig {
                payment_term_days: parse_env("PAYMENT_TERM_DAYS", Some("14"), is_prod)?,
                default_tax_pct: parse_env("DEFAULT_TAX_PCT", Some("21"), is_prod)?,
            },
        })
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, default, is_prod)?.parse().map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!(format!("Invalid value for {}: {}", key, e)))
    })
}
