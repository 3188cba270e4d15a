mod accounts;
mod config;
mod connect;
mod error;
mod server;
mod state;
mod triggers;
mod webhooks;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use config::{
    ConfigError, ConnectorBackend, IdentityConfig, ServiceConfig, DEFAULT_MAX_BODY_BYTES,
    DEFAULT_PORT,
};
pub use error::ApiError;
pub use server::{build_router, run_server};
pub use state::AppState;
