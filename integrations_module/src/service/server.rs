use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tokio::task;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::account_store::{build_account_store, AccountStore};
use crate::connector::{ConnectorGateway, InMemoryGateway, PipedreamGateway};
use crate::identity::SupabaseIdentityResolver;
use crate::webhook::LoggingWebhookSink;

use super::accounts::{list_accounts, sync_accounts};
use super::config::{ConnectorBackend, ServiceConfig};
use super::connect::{create_connect_token, get_component, list_components};
use super::state::AppState;
use super::triggers::{deploy_trigger, list_triggers};
use super::webhooks::receive_webhook;
use super::BoxError;

pub fn build_router(state: AppState) -> Router {
    let max_body_bytes = state.config.max_body_bytes;
    let cors = cors_layer(&state.config.cors_origins);
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/accounts", get(list_accounts))
        .route("/accounts/sync", post(sync_accounts))
        .route("/connect-tokens", post(create_connect_token))
        .route("/components", get(list_components))
        .route("/components/:key", get(get_component))
        .route("/triggers/deploy", post(deploy_trigger))
        .route("/triggers/list", get(list_triggers))
        .route("/webhooks/:hook", post(receive_webhook))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(cors)
}

pub async fn run_server(
    config: ServiceConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), BoxError> {
    let config = Arc::new(config);

    let gateway: Arc<dyn ConnectorGateway> = match &config.connector {
        ConnectorBackend::Pipedream(pipedream) => {
            info!(
                "connector backend=pipedream project={} environment={}",
                pipedream.project_id, pipedream.environment
            );
            Arc::new(PipedreamGateway::new(pipedream.clone())?)
        }
        ConnectorBackend::Memory => {
            warn!("connector backend=memory; no remote accounts will be visible");
            Arc::new(InMemoryGateway::new())
        }
    };

    let backend = config.account_store.clone();
    let store: Arc<dyn AccountStore> = task::spawn_blocking(move || build_account_store(&backend))
        .await
        .map_err(|err| -> BoxError { err.into() })??;

    let identity = Arc::new(SupabaseIdentityResolver::new(
        config.identity.supabase_url.clone(),
        config.identity.anon_key.clone(),
    ));
    if config.public_base_url.is_none() {
        warn!("HUB_PUBLIC_BASE_URL not set; trigger deploys must pass webhookUrl");
    }

    let state = AppState::new(
        config.clone(),
        identity,
        gateway,
        store,
        Arc::new(LoggingWebhookSink),
    );

    let host: IpAddr = config
        .host
        .parse()
        .map_err(|_| format!("invalid host: {}", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    info!("integrations hub listening on {}", addr);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring invalid CORS origin {}", origin);
                None
            }
        })
        .collect();
    if allowed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(allowed)
    }
}
