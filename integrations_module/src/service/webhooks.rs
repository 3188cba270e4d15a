use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use super::error::ApiError;
use super::state::AppState;

/// POST /webhooks/<provider>_<event>
pub(super) async fn receive_webhook(
    State(state): State<AppState>,
    Path(hook): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let ack = state.webhooks.receive(&hook, &body).await?;
    Ok(Json(json!({
        "success": true,
        "message": ack.message,
        "timestamp": ack.timestamp,
    })))
}
