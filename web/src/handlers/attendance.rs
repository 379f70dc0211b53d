//! League attendance answers from the confirm/decline email links.

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use simbay_core::ids::LeagueWeekId;
use simbay_core::status::{AttendanceStatus, StatusMachine};
use simbay_core::store::LeagueStore;

/// Answer recorded for the week
#[derive(Debug, Serialize)]
pub struct AttendanceResponse {
    /// Week answered for
    pub week_id: LeagueWeekId,
    /// Current answer
    pub status: AttendanceStatus,
}

fn parse_answer(answer: &str) -> Result<AttendanceStatus, AppError> {
    match answer {
        "confirm" => Ok(AttendanceStatus::Confirmed),
        "decline" => Ok(AttendanceStatus::Declined),
        other => Err(AppError::validation(format!(
            "Unknown attendance answer '{other}', expected confirm or decline"
        ))),
    }
}

fn closed() -> AppError {
    AppError::gone("Attendance for this week is closed")
}

/// Records a confirm or decline.
///
/// ```text
/// GET /attendance/:token/:answer
/// ```
///
/// Repeating the current answer is accepted without a write. Once the week's attendance is
/// locked every answer is refused with 410.
pub async fn respond(
    State(state): State<AppState>,
    Path((token, answer)): Path<(String, String)>,
) -> Result<Json<AttendanceResponse>, AppError> {
    let next = parse_answer(&answer)?;
    let row = state
        .store
        .attendance_by_token(&token)
        .await
        .map_err(simbay_core::error::BookingError::from)?
        .ok_or_else(|| AppError::not_found("Attendance request"))?;

    if row.locked {
        return Err(closed());
    }
    let ok = Json(AttendanceResponse {
        week_id: row.week_id,
        status: next,
    });
    if row.status == next {
        return Ok(ok);
    }
    row.status.transition(next)?;

    let written = state
        .store
        .respond_attendance(row.id, row.status, next)
        .await
        .map_err(simbay_core::error::BookingError::from)?;
    if written {
        tracing::info!(attendance_id = %row.id, week_id = %row.week_id, status = %next, "Attendance answered");
        return Ok(ok);
    }

    // lost a race with the lock job or another click
    match state
        .store
        .attendance_by_token(&token)
        .await
        .map_err(simbay_core::error::BookingError::from)?
    {
        Some(current) if current.locked => Err(closed()),
        Some(current) if current.status == next => Ok(ok),
        _ => Err(AppError::conflict("Attendance changed concurrently, please retry")),
    }
}
