//! REST endpoints: health, history, presence and minimal administration.

use crate::handlers::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use huddle_protocol::RoomId;
use serde::Deserialize;
use std::sync::Arc;
use tenvis_huddle_core::{HubError, NewRoom, StoreError};
use thiserror::Error;
use tracing::{error, info};

/// Largest history page served in one request.
pub const MAX_PAGE_SIZE: usize = 200;

const DEFAULT_PAGE_SIZE: usize = 50;

/// REST error, rendered as `{"error": "..."}` with a matching status.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The addressed resource does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The request body was rejected.
    #[error("{0}")]
    BadRequest(String),

    /// A uniqueness constraint was violated.
    #[error("{0}")]
    Conflict(String),

    /// Anything else.
    #[error("internal error")]
    Internal(#[source] StoreError),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::Invalid(msg) => Self::BadRequest(msg),
            other => Self::Internal(other),
        }
    }
}

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::RoomNotFound(room_id) => Self::NotFound(format!("room {room_id} not found")),
            HubError::Store(e) => e.into(),
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(e) => {
                error!(error = %e, "Request failed");
                crate::metrics::record_error("api");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Build the REST router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/api/presence", get(presence))
        .route("/api/rooms", post(create_room))
        .route("/api/rooms/:room_id/messages", get(room_history))
        .route("/api/users", post(create_user))
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.hub.stats();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.connections,
        "onlineUsers": stats.online_users,
        "rooms": stats.rooms,
    }))
}

async fn presence(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({ "userIds": state.hub.online_users() }))
}

/// History paging parameters.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    skip: usize,
    #[serde(default = "default_take")]
    take: usize,
}

fn default_take() -> usize {
    DEFAULT_PAGE_SIZE
}

async fn room_history(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<RoomId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Response, ApiError> {
    let take = query.take.min(MAX_PAGE_SIZE);
    let messages = state.hub.history(room_id, query.skip, take).await?;
    Ok(Json(messages).into_response())
}

/// Body of `POST /api/users`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUser {
    user_name: String,
    display_name: String,
}

async fn create_user(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateUser>,
) -> Result<Response, ApiError> {
    let user_name = body.user_name.trim();
    let display_name = body.display_name.trim();
    if user_name.is_empty() || display_name.is_empty() {
        return Err(ApiError::BadRequest(
            "userName and displayName are required".into(),
        ));
    }

    let profile = state.store.create_user(user_name, display_name).await?;
    info!(user = %profile.id, "User created");
    Ok((StatusCode::CREATED, Json(profile)).into_response())
}

async fn create_room(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewRoom>,
) -> Result<Response, ApiError> {
    let room = state.store.create_room(body).await?;
    info!(room = %room.id, "Room created");
    Ok((StatusCode::CREATED, Json(room)).into_response())
}
