use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::triggers::{AccountSelector, TriggerType};

use super::error::ApiError;
use super::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct DeployTriggerBody {
    #[serde(default)]
    external_user_id: Option<String>,
    #[serde(default)]
    account_id: Option<String>,
    #[serde(default)]
    trigger_type: Option<String>,
    #[serde(default)]
    webhook_url: Option<String>,
}

/// POST /triggers/deploy
pub(super) async fn deploy_trigger(
    State(state): State<AppState>,
    body: Result<Json<DeployTriggerBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let external_user_id = body
        .external_user_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("externalUserId is required"))?;
    let trigger = match body.trigger_type.as_deref().map(str::trim) {
        Some(key) if !key.is_empty() => key.parse::<TriggerType>()?,
        _ => TriggerType::default(),
    };
    let selector = AccountSelector::from_optional(body.account_id);

    let result = state
        .triggers
        .deploy_trigger(&external_user_id, trigger, &selector, body.webhook_url)
        .await?;
    let message = format!(
        "{} trigger deployed on {} account {}",
        trigger,
        trigger.app_name(),
        result.account_name
    );
    Ok(Json(json!({
        "success": true,
        "data": result,
        "message": message,
    })))
}

#[derive(Debug, Deserialize)]
pub(super) struct ListTriggersParams {
    #[serde(default)]
    external_user_id: Option<String>,
}

/// GET /triggers/list?external_user_id
pub(super) async fn list_triggers(
    State(state): State<AppState>,
    query: Result<Query<ListTriggersParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = query?;
    let external_user_id = params
        .external_user_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("external_user_id is required"))?;
    let triggers = state.triggers.list_triggers(&external_user_id).await?;
    Ok(Json(json!({
        "data": triggers,
        "success": true,
    })))
}
