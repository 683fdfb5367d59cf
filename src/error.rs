use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    /// The document exists but its lifecycle state forbids the operation,
    /// e.g. converting a draft quote or deleting a paid invoice.
    #[error("Invalid state: {0}")]
    InvalidState(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<String>,
        }

        let (status, error_message, details) = match self {
            AppError::Validation(err) => (StatusCode::BAD_REQUEST, err.to_string(), None),
            AppError::NotFound(err) => (StatusCode::NOT_FOUND, err.to_string(), None),
            AppError::InvalidState(err) => (StatusCode::CONFLICT, err.to_string(), None),
            AppError::Conflict(err) => (StatusCode::CONFLICT, err.to_string(), None),
            AppError::InternalError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                Some(format!("{:#?}", err)),
            ),
            AppError::DatabaseError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
                Some(err.to_string()),
            ),
            AppError::ConfigError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration error".to_string(),
                Some(err.to_string()),
            ),
        };

        (
            status,
            Json(ErrorResponse {
                error: error_message,
                details,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_errors_map_to_conflict() {
        let invalid = AppError::InvalidState(anyhow::anyhow!("quote is not accepted"));
        assert_eq!(invalid.into_response().status(), StatusCode::CONFLICT);

        let conflict = AppError::Conflict(anyhow::anyhow!("invoice already exists"));
        assert_eq!(conflict.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_client_errors_map_to_4xx() {
        let validation = AppError::Validation(anyhow::anyhow!("quantity must be positive"));
        assert_eq!(validation.into_response().status(), StatusCode::BAD_REQUEST);

        let not_found = AppError::NotFound(anyhow::anyhow!("quote not found"));
        assert_eq!(not_found.into_response().status(), StatusCode::NOT_FOUND);
    }
}
