#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use integrations_module::account_store::{AccountStoreBackend, SqliteAccountStore};
use integrations_module::connector::{AppMetadata, ConnectedAccount, InMemoryGateway};
use integrations_module::identity::{extract_bearer_token, IdentityError, IdentityResolver};
use integrations_module::service::{
    build_router, AppState, ConnectorBackend, IdentityConfig, ServiceConfig,
    DEFAULT_MAX_BODY_BYTES,
};
use integrations_module::webhook::{WebhookError, WebhookEvent, WebhookSink};

pub const PUBLIC_BASE_URL: &str = "https://hub.example.com";

/// Accepts a fixed set of bearer tokens.
pub struct StaticIdentity {
    tokens: HashMap<String, String>,
}

impl StaticIdentity {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        Self {
            tokens: pairs
                .iter()
                .map(|(token, user)| (token.to_string(), user.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentity {
    async fn resolve(&self, headers: &HeaderMap) -> Result<String, IdentityError> {
        let token = extract_bearer_token(headers).ok_or(IdentityError::MissingToken)?;
        self.tokens
            .get(&token)
            .cloned()
            .ok_or(IdentityError::InvalidToken)
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<WebhookEvent>>,
}

#[async_trait]
impl WebhookSink for RecordingSink {
    async fn deliver(&self, event: WebhookEvent) -> Result<(), WebhookError> {
        self.events
            .lock()
            .map_err(|_| WebhookError::Sink("poisoned".to_string()))?
            .push(event);
        Ok(())
    }
}

pub fn account(id: &str, user: &str, app: &str, healthy: bool) -> ConnectedAccount {
    let at = Utc.timestamp_opt(1_714_557_600, 0).unwrap();
    ConnectedAccount {
        id: id.to_string(),
        external_user_id: user.to_string(),
        app_slug: app.to_string(),
        name: Some(format!("{id}@example.com")),
        healthy,
        dead: Some(false),
        created_at: Some(at),
        updated_at: Some(at),
        app: AppMetadata {
            name: Some(app.to_string()),
            auth_type: Some("oauth".to_string()),
            categories: vec!["Productivity".to_string()],
        },
        credentials: None,
    }
}

pub struct TestHub {
    pub app: Router,
    pub gateway: Arc<InMemoryGateway>,
    pub sink: Arc<RecordingSink>,
    pub db_path: PathBuf,
    _temp: TempDir,
}

/// Router over an in-memory gateway and a fresh SQLite cache.
/// Token `token-<user>` authenticates as `<user>` for users u1 and u2.
pub fn hub() -> TestHub {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("accounts.db");
    let config = ServiceConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        public_base_url: Some(PUBLIC_BASE_URL.to_string()),
        max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        cors_origins: Vec::new(),
        identity: IdentityConfig {
            supabase_url: "http://127.0.0.1:9".to_string(),
            anon_key: String::new(),
        },
        connector: ConnectorBackend::Memory,
        account_store: AccountStoreBackend::Sqlite {
            path: db_path.clone(),
        },
    };
    let gateway = Arc::new(InMemoryGateway::new());
    let sink = Arc::new(RecordingSink::default());
    let store = Arc::new(SqliteAccountStore::new(&db_path).unwrap());
    let identity = Arc::new(StaticIdentity::new(&[("token-u1", "u1"), ("token-u2", "u2")]));
    let state = AppState::new(
        Arc::new(config),
        identity,
        gateway.clone(),
        store,
        sink.clone(),
    );

    TestHub {
        app: build_router(state),
        gateway,
        sink,
        db_path,
        _temp: temp,
    }
}

/// Run one request through the router; returns status and parsed JSON body
/// (`Value::Null` for non-JSON bodies).
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn post_raw(uri: &str, body: &'static str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

pub fn post_authed(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn require_account_store_db_url(test_name: &str) -> Option<String> {
    dotenvy::dotenv().ok();
    match std::env::var("ACCOUNT_STORE_TEST_DB_URL") {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => {
            eprintln!("Skipping {test_name}; ACCOUNT_STORE_TEST_DB_URL not set.");
            None
        }
    }
}
