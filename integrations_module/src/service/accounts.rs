use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tracing::{debug, info};

use crate::account_sync::AccountSource;
use crate::connector::AccountFilter;

use super::error::ApiError;
use super::state::AppState;

/// GET /accounts?app&oauth_app_id&external_user_id&include_credentials
pub(super) async fn list_accounts(
    State(state): State<AppState>,
    query: Result<Query<AccountFilter>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(filter) = query?;
    let listing = state.accounts.list_accounts(&filter).await?;
    debug!(
        "listed {} accounts from {}",
        listing.accounts.len(),
        match listing.source {
            AccountSource::Cache => "cache",
            AccountSource::Remote => "remote",
        }
    );
    Ok(Json(json!({
        "data": listing.accounts,
        "success": true,
    })))
}

/// POST /accounts/sync
/// Requires: Authorization: Bearer <supabase_access_token>
pub(super) async fn sync_accounts(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let external_user_id = state.identity.resolve(&headers).await?;
    let accounts = state.accounts.sync_user_accounts(&external_user_id).await?;
    info!(
        "synced {} accounts for {}",
        accounts.len(),
        external_user_id
    );
    Ok(Json(json!({
        "success": true,
        "accountsCount": accounts.len(),
        "accounts": accounts,
    })))
}
