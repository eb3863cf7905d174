use axum::{
    extract::{Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tixgate_core::Admission;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    pub user_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Waiting,
    Ready,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueResponse {
    pub user_id: i64,
    pub status: QueueStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<u64>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_user_count: Option<u64>,
}

impl QueueResponse {
    fn from_admission(user_id: i64, admission: Admission) -> Self {
        match admission {
            Admission::Allowed => Self {
                user_id,
                status: QueueStatus::Ready,
                rank: None,
                message: "You may proceed to reservation".to_string(),
                active_user_count: None,
            },
            Admission::Waiting { rank } => Self {
                user_id,
                status: QueueStatus::Waiting,
                rank: Some(rank),
                message: format!("Waiting in queue at position {}", rank),
                active_user_count: None,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveResponse {
    pub user_id: i64,
    pub message: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/queue/enter", post(enter_queue))
        .route("/queue/status", get(queue_status))
        .route("/queue", delete(leave_queue))
}

async fn enter_queue(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<QueueResponse>, AppError> {
    let admission = state.queue.register(query.user_id).await?;
    Ok(Json(QueueResponse::from_admission(query.user_id, admission)))
}

/// Polled by waiting clients. An unknown user is queued on first poll.
async fn queue_status(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<QueueResponse>, AppError> {
    let admission = state.queue.register(query.user_id).await?;
    let mut response = QueueResponse::from_admission(query.user_id, admission);
    response.active_user_count = Some(state.queue.active_count().await?);
    Ok(Json(response))
}

async fn leave_queue(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<LeaveResponse>, AppError> {
    state.queue.release(query.user_id).await?;
    Ok(Json(LeaveResponse {
        user_id: query.user_id,
        message: "Removed from queue".to_string(),
    }))
}
