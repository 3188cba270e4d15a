//! OAuth client-credentials token management for the connector API.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, error};

use super::ConnectorError;

/// Refresh this long before the platform-reported expiry.
const EXPIRY_BUFFER: Duration = Duration::from_secs(60);
/// Upper bound on how long a token is trusted, whatever `expires_in` says.
const MAX_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub(crate) struct ConnectAuth {
    token_url: String,
    client_id: String,
    client_secret: String,
    cached: Arc<RwLock<Option<CachedToken>>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    expires_in: u64,
    #[allow(dead_code)]
    token_type: Option<String>,
}

impl ConnectAuth {
    pub(crate) fn new(api_base_url: &str, client_id: &str, client_secret: &str) -> Self {
        Self {
            token_url: format!("{}/v1/oauth/token", api_base_url.trim_end_matches('/')),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            cached: Arc::new(RwLock::new(None)),
        }
    }

    /// Get a valid access token, requesting a new one if necessary.
    pub(crate) async fn access_token(
        &self,
        http: &reqwest::Client,
    ) -> Result<String, ConnectorError> {
        {
            let cached = self.cached.read().await;
            if let Some(token) = cached.as_ref() {
                if token.expires_at > Instant::now() + EXPIRY_BUFFER {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let mut cached = self.cached.write().await;
        // Another request may have refreshed while we waited for the lock.
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + EXPIRY_BUFFER {
                return Ok(token.access_token.clone());
            }
        }

        debug!("requesting connector API access token");
        let response = http
            .post(&self.token_url)
            .json(&serde_json::json!({
                "grant_type": "client_credentials",
                "client_id": self.client_id,
                "client_secret": self.client_secret,
            }))
            .send()
            .await
            .map_err(super::pipedream::transport_error)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(super::pipedream::transport_error)?;
        if !status.is_success() {
            error!("connector token request failed: {} - {}", status, body);
            return Err(ConnectorError::from_status(status.as_u16(), &body));
        }

        let token: OAuthTokenResponse =
            serde_json::from_str(&body).map_err(|err| ConnectorError::Fault {
                status: Some(status.as_u16()),
                message: format!("invalid token response: {}", err),
            })?;

        let access_token = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: token.access_token,
            expires_at: token_deadline(Instant::now(), token.expires_in),
        });
        Ok(access_token)
    }
}

fn token_deadline(now: Instant, expires_in: u64) -> Instant {
    let ttl = Duration::from_secs(expires_in).min(MAX_TOKEN_TTL);
    now.checked_add(ttl).unwrap_or(now)
}
