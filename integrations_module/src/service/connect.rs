use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::connector::{ComponentQuery, ComponentType};

use super::error::ApiError;
use super::state::AppState;

/// POST /connect-tokens
/// Requires: Authorization: Bearer <supabase_access_token>
pub(super) async fn create_connect_token(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let external_user_id = state.identity.resolve(&headers).await?;
    let token = state
        .gateway
        .create_connect_token(&external_user_id)
        .await?;
    info!(
        "issued connect token for {} (expires {})",
        external_user_id, token.expires_at
    );
    Ok(Json(json!({
        "success": true,
        "data": token,
    })))
}

#[derive(Debug, Deserialize)]
pub(super) struct ComponentParams {
    #[serde(default)]
    app: Option<String>,
    #[serde(default)]
    q: Option<String>,
    #[serde(default)]
    component_type: Option<String>,
}

/// GET /components?app&q&component_type
pub(super) async fn list_components(
    State(state): State<AppState>,
    query: Result<Query<ComponentParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = query?;
    let component_type = match params.component_type.as_deref().map(str::trim) {
        Some(kind) if !kind.is_empty() => Some(
            kind.parse::<ComponentType>()
                .map_err(ApiError::bad_request)?,
        ),
        _ => None,
    };
    let query = ComponentQuery {
        app: non_blank(params.app),
        query: non_blank(params.q),
        component_type,
    };
    let components = state.gateway.get_components(&query).await?;
    Ok(Json(json!({
        "data": components,
        "success": true,
    })))
}

/// GET /components/:key
pub(super) async fn get_component(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let component = state.gateway.get_component_definition(&key).await?;
    Ok(Json(json!({
        "data": component,
        "success": true,
    })))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
