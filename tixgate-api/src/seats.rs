use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use tixgate_core::SeatView;

use crate::{error::AppError, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/seats", get(list_seats))
        .route("/seats/available", get(list_available))
        .route("/seats/{id}", get(get_seat))
}

async fn list_seats(State(state): State<AppState>) -> Result<Json<Vec<SeatView>>, AppError> {
    Ok(Json(state.catalog.list().await?))
}

async fn list_available(State(state): State<AppState>) -> Result<Json<Vec<SeatView>>, AppError> {
    Ok(Json(state.catalog.available().await?))
}

async fn get_seat(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<SeatView>, AppError> {
    state
        .catalog
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFoundError(format!("Seat not found: {}", id)))
}
