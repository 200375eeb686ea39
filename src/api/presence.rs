//! Presence lookup: is a user currently reachable for real-time notifications.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct PresenceResponse {
    pub user_id: String,
    pub connection_id: Uuid,
    pub authenticated_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// GET /api/v1/presence/{user_id}
///
/// 404 when the user has no live connection.
pub async fn presence(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<PresenceResponse>> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(AppError::Validation("user id must not be empty".to_string()));
    }

    let entry = state
        .directory
        .entry(user_id)
        .ok_or_else(|| AppError::NotFound(format!("user {} is not connected", user_id)))?;

    let handle = state
        .directory
        .get_connection(entry.connection_id)
        .ok_or_else(|| AppError::NotFound(format!("user {} is not connected", user_id)))?;

    Ok(Json(PresenceResponse {
        user_id: entry.user_id,
        connection_id: entry.connection_id,
        authenticated_at: entry.authenticated_at,
        last_activity: handle.last_activity(),
    }))
}
