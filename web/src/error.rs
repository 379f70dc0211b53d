//! Error types for web handlers.
//!
//! Domain errors are mapped by [`ErrorCategory`], never by individual variant. Internal
//! details (store messages, identifiers) are logged and replaced with a generic message
//! in the response body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use simbay_core::error::{BookingError, ErrorCategory};
use std::fmt;

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler(State(state): State<AppState>) -> Result<Json<Data>, AppError> {
///     let outcome = state.lifecycle.on_payment_succeeded(&intent).await?;
///     Ok(Json(outcome.into()))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: &'static str,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>, code: &'static str) -> Self {
        Self {
            status,
            message: message.into(),
            code,
            source: None,
        }
    }

    /// Attach the underlying error for logging.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// 400 Bad Request
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, "BAD_REQUEST")
    }

    /// 404 Not Found
    #[must_use]
    pub fn not_found(resource: impl fmt::Display) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("{resource} not found"), "NOT_FOUND")
    }

    /// 409 Conflict
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message, "CONFLICT")
    }

    /// 410 Gone
    #[must_use]
    pub fn gone(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GONE, message, "EXPIRED")
    }

    /// 422 Unprocessable Entity
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message, "VALIDATION_ERROR")
    }

    /// 500 Internal Server Error
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message, "INTERNAL_SERVER_ERROR")
    }

    /// 502 Bad Gateway
    #[must_use]
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message, "UPSTREAM_ERROR")
    }

    /// Status code of the response
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                ),
                None => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    "Request failed"
                ),
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        let mapped = match err.category() {
            ErrorCategory::Validation => Self::validation(err.to_string()),
            ErrorCategory::NotFound => {
                Self::new(StatusCode::NOT_FOUND, "Resource not found", "NOT_FOUND")
            },
            ErrorCategory::StateConflict => Self::conflict(err.to_string()),
            ErrorCategory::Expired => Self::gone(err.to_string()),
            // gateway messages are safe to show; kiosk and email details are not
            ErrorCategory::Upstream => match &err {
                BookingError::Gateway(message) => Self::upstream(message.clone()),
                _ => Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "A dependent service is unavailable",
                    "SERVICE_UNAVAILABLE",
                ),
            },
            ErrorCategory::ConfigIntegrity => Self::internal("Service misconfigured"),
            ErrorCategory::Store => Self::internal("An internal error occurred"),
        };
        mapped.with_source(anyhow::Error::new(err))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simbay_core::error::StoreError;
    use simbay_core::ids::BookingId;

    #[test]
    fn test_error_display() {
        let err = AppError::bad_request("Invalid input");
        assert_eq!(err.to_string(), "[BAD_REQUEST] Invalid input");
    }

    #[test]
    fn categories_map_to_status_codes() {
        let id = BookingId::new();
        let cases = [
            (BookingError::InvalidInterval, StatusCode::UNPROCESSABLE_ENTITY),
            (BookingError::BookingNotFound(id), StatusCode::NOT_FOUND),
            (BookingError::StateConflict("x".into()), StatusCode::CONFLICT),
            (BookingError::ReservationExpired(id), StatusCode::GONE),
            (BookingError::Gateway("card declined".into()), StatusCode::BAD_GATEWAY),
            (BookingError::Kiosk("gone".into()), StatusCode::SERVICE_UNAVAILABLE),
            (BookingError::NoPricingRule("Mon 03:00".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (
                BookingError::Store(StoreError::Database("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                BookingError::Store(StoreError::Conflict("overlap".into())),
                StatusCode::CONFLICT,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }

    #[test]
    fn internal_details_are_not_exposed() {
        let err = AppError::from(BookingError::Store(StoreError::Database(
            "connection to 10.0.0.5 refused".into(),
        )));
        assert!(!err.to_string().contains("10.0.0.5"));

        let declined = AppError::from(BookingError::Gateway("Your card was declined.".into()));
        assert_eq!(declined.to_string(), "[UPSTREAM_ERROR] Your card was declined.");
    }
}
