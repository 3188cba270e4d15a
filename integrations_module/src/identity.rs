//! Maps an inbound session token to the caller's external user id.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::Deserialize;
use tracing::error;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("Missing Authorization header")]
    MissingToken,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid response from auth service")]
    InvalidResponse,
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve the request's bearer token to an external user id.
    async fn resolve(&self, headers: &HeaderMap) -> Result<String, IdentityError>;
}

/// Validates Supabase access tokens against `/auth/v1/user`.
pub struct SupabaseIdentityResolver {
    client: reqwest::Client,
    project_url: String,
    anon_key: String,
}

#[derive(Debug, Deserialize)]
struct SupabaseUser {
    id: String,
}

impl SupabaseIdentityResolver {
    pub fn new(project_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            project_url: project_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
        }
    }
}

#[async_trait]
impl IdentityResolver for SupabaseIdentityResolver {
    async fn resolve(&self, headers: &HeaderMap) -> Result<String, IdentityError> {
        let token = extract_bearer_token(headers).ok_or(IdentityError::MissingToken)?;
        let resp = self
            .client
            .get(format!("{}/auth/v1/user", self.project_url))
            .header("Authorization", format!("Bearer {}", token))
            .header("apikey", &self.anon_key)
            .send()
            .await
            .map_err(|e| {
                error!("Failed to validate token with Supabase: {}", e);
                IdentityError::Unavailable(e.to_string())
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            error!("Supabase auth validation failed: {} - {}", status, body);
            return Err(IdentityError::InvalidToken);
        }

        let user: SupabaseUser = resp.json().await.map_err(|e| {
            error!("Failed to parse Supabase user response: {}", e);
            IdentityError::InvalidResponse
        })?;
        if user.id.trim().is_empty() {
            return Err(IdentityError::InvalidResponse);
        }
        Ok(user.id)
    }
}

/// Extract Bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
