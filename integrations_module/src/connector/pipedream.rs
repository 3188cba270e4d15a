//! HTTP client for the Pipedream Connect REST API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use super::auth::ConnectAuth;
use super::models::{
    storage_precision, AccountFilter, AppMetadata, Component, ComponentQuery, ConnectToken,
    ConnectedAccount, DeployTriggerRequest, DeployedTrigger,
};
use super::{ConnectorError, ConnectorGateway};

pub const DEFAULT_API_BASE_URL: &str = "https://api.pipedream.com";
pub const DEFAULT_ENVIRONMENT: &str = "development";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipedreamConfig {
    pub api_base_url: String,
    pub project_id: String,
    /// Sent as `x-pd-environment` (`development` or `production`).
    pub environment: String,
    pub client_id: String,
    pub client_secret: String,
    pub request_timeout: Duration,
    /// Origins allowed to open the hosted connect flow with an issued token.
    pub allowed_origins: Vec<String>,
}

impl PipedreamConfig {
    pub fn new(project_id: &str, client_id: &str, client_secret: &str) -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            project_id: project_id.to_string(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipedreamGateway {
    http: reqwest::Client,
    config: PipedreamConfig,
    auth: ConnectAuth,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct RemoteAccount {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    external_id: Option<String>,
    #[serde(default)]
    healthy: Option<bool>,
    #[serde(default)]
    dead: Option<bool>,
    #[serde(default)]
    app: Option<RemoteApp>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    credentials: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RemoteApp {
    #[serde(default)]
    name_slug: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    auth_type: Option<String>,
    #[serde(default)]
    categories: Vec<String>,
}

impl RemoteAccount {
    fn into_account(self, fallback_user: Option<&str>) -> ConnectedAccount {
        let app = self.app.unwrap_or_default();
        ConnectedAccount {
            id: self.id,
            external_user_id: self
                .external_id
                .or_else(|| fallback_user.map(|user| user.to_string()))
                .unwrap_or_default(),
            app_slug: app.name_slug.unwrap_or_default(),
            name: self.name,
            healthy: self.healthy.unwrap_or(false),
            dead: self.dead,
            created_at: self.created_at.map(storage_precision),
            updated_at: self.updated_at.map(storage_precision),
            app: AppMetadata {
                name: app.name,
                auth_type: app.auth_type,
                categories: app.categories,
            },
            credentials: self.credentials,
        }
    }
}

pub(crate) fn transport_error(err: reqwest::Error) -> ConnectorError {
    if err.is_timeout() {
        ConnectorError::Unavailable(format!("request timed out: {}", err))
    } else {
        ConnectorError::Unavailable(err.to_string())
    }
}

impl PipedreamGateway {
    pub fn new(config: PipedreamConfig) -> Result<Self, ConnectorError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| ConnectorError::Unavailable(format!("http client: {}", err)))?;
        let auth = ConnectAuth::new(&config.api_base_url, &config.client_id, &config.client_secret);
        Ok(Self { http, config, auth })
    }

    fn project_url(&self, path: &str) -> String {
        format!(
            "{}/v1/connect/{}/{}",
            self.config.api_base_url.trim_end_matches('/'),
            urlencoding::encode(&self.config.project_id),
            path
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, self.project_url(path))
            .header("x-pd-environment", &self.config.environment)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ConnectorError> {
        let token = self.auth.access_token(&self.http).await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            warn!("connector API returned {}: {}", status, body);
            return Err(ConnectorError::from_status(status.as_u16(), &body));
        }

        serde_json::from_str(&body).map_err(|err| ConnectorError::Fault {
            status: Some(status.as_u16()),
            message: format!("invalid response body: {}", err),
        })
    }
}

#[async_trait]
impl ConnectorGateway for PipedreamGateway {
    async fn list_accounts(
        &self,
        filter: &AccountFilter,
    ) -> Result<Vec<ConnectedAccount>, ConnectorError> {
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(user) = filter.external_user_id.as_ref() {
            params.push(("external_user_id", user.clone()));
        }
        if let Some(app) = filter.app.as_ref() {
            params.push(("app", app.clone()));
        }
        if let Some(oauth_app_id) = filter.oauth_app_id.as_ref() {
            params.push(("oauth_app_id", oauth_app_id.clone()));
        }
        if filter.include_credentials {
            params.push(("include_credentials", "true".to_string()));
        }

        let envelope: DataEnvelope<Vec<RemoteAccount>> = self
            .send(self.request(Method::GET, "accounts").query(&params))
            .await?;
        debug!("connector listed {} accounts", envelope.data.len());

        let fallback_user = filter.external_user_id.as_deref();
        Ok(envelope
            .data
            .into_iter()
            .map(|account| account.into_account(fallback_user))
            .collect())
    }

    async fn get_components(
        &self,
        query: &ComponentQuery,
    ) -> Result<Vec<Component>, ConnectorError> {
        let path = query
            .component_type
            .map(|kind| kind.path_segment())
            .unwrap_or("components");
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(app) = query.app.as_ref() {
            params.push(("app", app.clone()));
        }
        if let Some(q) = query.query.as_ref() {
            params.push(("q", q.clone()));
        }

        let envelope: DataEnvelope<Vec<Component>> =
            self.send(self.request(Method::GET, path).query(&params)).await?;
        Ok(envelope.data)
    }

    async fn get_component_definition(&self, key: &str) -> Result<Component, ConnectorError> {
        let path = format!("components/{}", urlencoding::encode(key));
        let envelope: DataEnvelope<Component> =
            self.send(self.request(Method::GET, &path)).await?;
        Ok(envelope.data)
    }

    async fn create_connect_token(
        &self,
        external_user_id: &str,
    ) -> Result<ConnectToken, ConnectorError> {
        let mut body = serde_json::json!({ "external_user_id": external_user_id });
        if !self.config.allowed_origins.is_empty() {
            body["allowed_origins"] = serde_json::json!(self.config.allowed_origins);
        }
        self.send(self.request(Method::POST, "tokens").json(&body))
            .await
    }

    async fn list_triggers(
        &self,
        external_user_id: &str,
    ) -> Result<Vec<DeployedTrigger>, ConnectorError> {
        let envelope: DataEnvelope<Vec<DeployedTrigger>> = self
            .send(
                self.request(Method::GET, "deployed-triggers")
                    .query(&[("external_user_id", external_user_id)]),
            )
            .await?;
        Ok(envelope.data)
    }

    async fn deploy_trigger(
        &self,
        request: &DeployTriggerRequest,
    ) -> Result<DeployedTrigger, ConnectorError> {
        let body = serde_json::json!({
            "id": request.trigger_id,
            "external_user_id": request.external_user_id,
            "configured_props": request.configured_props,
            "webhook_url": request.webhook_url,
        });
        let envelope: DataEnvelope<DeployedTrigger> = self
            .send(self.request(Method::POST, "triggers/deploy").json(&body))
            .await?;
        Ok(envelope.data)
    }
}
