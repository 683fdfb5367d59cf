//! Document number allocation.
//!
//! Numbers are a prefix plus a zero-padded counter: `Q0001`, `INV0013`,
//! `CERT0002`. Each prefix has a row in `document_counters` that is bumped
//! atomically inside the caller's transaction; the first allocation for a
//! prefix seeds the counter from the highest committed number, so data that
//! predates the counter keeps its sequence.

use crate::error::AppError;
use sqlx::{Postgres, Transaction};

/// Width numbers are padded to. Larger values grow wider, never truncate.
pub const NUMBER_WIDTH: usize = 4;

/// Kinds of numbered documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Quote,
    Invoice,
    Certificate,
}

impl DocumentKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            DocumentKind::Quote => "Q",
            DocumentKind::Invoice => "INV",
            DocumentKind::Certificate => "CERT",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Quote => "quote",
            DocumentKind::Invoice => "invoice",
            DocumentKind::Certificate => "certificate",
        }
    }

    /// Query returning the allocated numbers of this kind, used to seed the
    /// counter on first allocation.
    fn scan_sql(&self) -> &'static str {
        match self {
            DocumentKind::Quote => "SELECT quote_number FROM quotes",
            DocumentKind::Invoice => "SELECT invoice_number FROM invoices",
            DocumentKind::Certificate => "SELECT certificate_number FROM certificates",
        }
    }
}

/// Parse the numeric suffix of `number` if it is exactly `prefix` followed
/// by ASCII digits. Foreign prefixes and malformed values yield `None`.
pub fn parse_suffix(prefix: &str, number: &str) -> Option<i64> {
    let rest = number.strip_prefix(prefix)?;
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

/// Format `value` as a document number for `prefix`.
pub fn format_number(prefix: &str, value: i64) -> String {
    format!("{}{:0width$}", prefix, value, width = NUMBER_WIDTH)
}

/// Highest numeric suffix among `numbers` for `prefix`; 0 when none match.
pub fn highest_suffix<'a, I>(prefix: &str, numbers: I) -> i64
where
    I: IntoIterator<Item = &'a str>,
{
    numbers
        .into_iter()
        .filter_map(|number| parse_suffix(prefix, number))
        .max()
        .unwrap_or(0)
}

/// Next number for `prefix` given the existing population (max + 1).
pub fn next_number<'a, I>(prefix: &str, numbers: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    format_number(prefix, highest_suffix(prefix, numbers) + 1)
}

/// Allocate the next number for `kind` inside `tx`.
///
/// The UPDATE holds the counter row lock until the transaction ends, so
/// concurrent allocators serialize instead of reading the same maximum. A
/// rollback releases the value together with the document insert it was
/// meant for; the unique indexes on the number columns are the backstop.
pub(crate) async fn allocate_number(
    tx: &mut Transaction<'_, Postgres>,
    kind: DocumentKind,
) -> Result<String, AppError> {
    let bumped: Option<i64> = sqlx::query_scalar(
        "UPDATE document_counters SET last_value = last_value + 1 WHERE prefix = $1 RETURNING last_value",
    )
    .bind(kind.prefix())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to bump document counter: {}", e))
    })?;

    let value = match bumped {
        Some(value) => value,
        None => seed_counter(tx, kind).await?,
    };

    Ok(format_number(kind.prefix(), value))
}

/// First allocation for a prefix: seed the counter from the highest
/// committed number. When two seeders race, the loser of the INSERT lands
/// in the ON CONFLICT arm and bumps the winner's row instead.
async fn seed_counter(
    tx: &mut Transaction<'_, Postgres>,
    kind: DocumentKind,
) -> Result<i64, AppError> {
    let numbers: Vec<String> = sqlx::query_scalar(kind.scan_sql())
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to scan document numbers: {}", e))
        })?;

    let seed = highest_suffix(kind.prefix(), numbers.iter().map(String::as_str));

    sqlx::query_scalar(
        r#"
        INSERT INTO document_counters (prefix, last_value)
        VALUES ($1, $2 + 1)
        ON CONFLICT (prefix)
        DO UPDATE SET last_value = document_counters.last_value + 1
        RETURNING last_value
        "#,
    )
    .bind(kind.prefix())
    .bind(seed)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to seed document counter: {}", e))
    })
}
