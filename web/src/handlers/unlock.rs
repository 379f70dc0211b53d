//! Unlock links from reminder emails.

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use simbay_core::access::UnlockReason;
use simbay_core::ids::BookingId;
use simbay_runtime::UnlockOutcome;

/// Response body of an unlock attempt
#[derive(Debug, Serialize)]
pub struct UnlockResponse {
    /// Door opened
    pub granted: bool,
    /// Booking the link resolved to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<BookingId>,
    /// Machine-readable denial
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<UnlockReason>,
    /// Text for the person at the door
    pub message: String,
}

impl From<UnlockOutcome> for UnlockResponse {
    fn from(outcome: UnlockOutcome) -> Self {
        let message = outcome.message();
        Self {
            granted: outcome.granted,
            booking_id: outcome.booking_id,
            reason: outcome.reason,
            message,
        }
    }
}

/// HTTP status for a denial reason; `None` means granted
#[must_use]
pub const fn status_for(reason: Option<&UnlockReason>) -> StatusCode {
    match reason {
        None => StatusCode::OK,
        Some(UnlockReason::TooEarly { .. } | UnlockReason::NotConfirmed) => StatusCode::FORBIDDEN,
        Some(UnlockReason::BookingEnded | UnlockReason::TokenExpired) => StatusCode::GONE,
        Some(UnlockReason::TokenInvalid) => StatusCode::BAD_REQUEST,
        Some(UnlockReason::KioskUnavailable) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Opens the bay door for the booking an unlock link names.
///
/// ```text
/// GET /unlock/:token
/// ```
///
/// Every attempt is written to the access log before responding.
pub async fn unlock_by_link(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<(StatusCode, Json<UnlockResponse>), AppError> {
    let outcome = state.unlock.unlock_with_token(&token).await?;
    let status = status_for(outcome.reason.as_ref());
    Ok((status, Json(outcome.into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn denial_reasons_map_to_statuses() {
        assert_eq!(status_for(None), StatusCode::OK);
        assert_eq!(
            status_for(Some(&UnlockReason::TooEarly {
                opens_at: Utc::now(),
                timezone: chrono_tz::UTC,
            })),
            StatusCode::FORBIDDEN
        );
        assert_eq!(status_for(Some(&UnlockReason::TokenExpired)), StatusCode::GONE);
        assert_eq!(status_for(Some(&UnlockReason::TokenInvalid)), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(Some(&UnlockReason::KioskUnavailable)),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
