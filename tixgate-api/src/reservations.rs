use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tixgate_core::{Reservation, ReservationError};
use tracing::warn;

use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRequest {
    pub seat_id: i64,
    pub user_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Queue position, only for callers that have not been admitted yet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation: Option<Reservation>,
}

impl ReservationResponse {
    fn ok(message: &str, reservation: Option<Reservation>) -> Self {
        Self {
            success: true,
            message: message.to_string(),
            code: None,
            rank: None,
            reservation,
        }
    }

    fn rejected(err: &ReservationError, rank: Option<u64>) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            code: Some(err.code().to_string()),
            rank,
            reservation: None,
        }
    }
}

pub fn status_for(err: &ReservationError) -> StatusCode {
    match err {
        ReservationError::NotAdmitted { .. } | ReservationError::NotOwner { .. } => StatusCode::FORBIDDEN,
        ReservationError::SeatNotFound(_) => StatusCode::NOT_FOUND,
        ReservationError::Unknown { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        ReservationError::LockBusy(_)
        | ReservationError::AlreadySelected(_)
        | ReservationError::AlreadyConfirmed(_)
        | ReservationError::PaymentFailed(_)
        | ReservationError::AlreadyReservedConflict(_)
        | ReservationError::AlreadyCancelledConflict(_) => StatusCode::CONFLICT,
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/reservations/reserve", post(reserve_seat))
        .route("/reservations/cancel", post(cancel_reservation))
}

async fn reserve_seat(
    State(state): State<AppState>,
    Json(req): Json<ReservationRequest>,
) -> (StatusCode, Json<ReservationResponse>) {
    match state.coordinator.reserve(req.seat_id, req.user_id).await {
        Ok(reservation) => (
            StatusCode::OK,
            Json(ReservationResponse::ok("Seat reserved", Some(reservation))),
        ),
        Err(err) => {
            let rank = match &err {
                ReservationError::NotAdmitted { user_id } => match state.queue.rank(*user_id).await {
                    Ok(rank) => rank,
                    Err(e) => {
                        warn!("Could not look up rank for user {}: {}", user_id, e);
                        None
                    }
                },
                _ => None,
            };
            (status_for(&err), Json(ReservationResponse::rejected(&err, rank)))
        }
    }
}

async fn cancel_reservation(
    State(state): State<AppState>,
    Json(req): Json<ReservationRequest>,
) -> (StatusCode, Json<ReservationResponse>) {
    match state.coordinator.cancel(req.seat_id, req.user_id).await {
        Ok(_) => (StatusCode::OK, Json(ReservationResponse::ok("Reservation cancelled", None))),
        Err(err) => (status_for(&err), Json(ReservationResponse::rejected(&err, None))),
    }
}
