use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::account_store::AccountStoreBackend;
use crate::connector::pipedream::{DEFAULT_API_BASE_URL, DEFAULT_ENVIRONMENT};
use crate::connector::PipedreamConfig;

pub const DEFAULT_PORT: u16 = 9002;
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;
const DEFAULT_ACCOUNT_STORE_PATH: &str = "state/accounts.db";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to resolve working directory: {0}")]
    WorkingDir(#[source] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorBackend {
    Pipedream(PipedreamConfig),
    /// In-process stand-in with no accounts; for local runs without credentials.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityConfig {
    pub supabase_url: String,
    pub anon_key: String,
}

/// Process-wide settings, built once at startup and shared read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    /// Externally reachable base URL, used to build default webhook URLs.
    pub public_base_url: Option<String>,
    pub max_body_bytes: usize,
    /// Empty means any origin.
    pub cors_origins: Vec<String>,
    pub identity: IdentityConfig,
    pub connector: ConnectorBackend,
    pub account_store: AccountStoreBackend,
}

#[derive(Debug, Deserialize, Default)]
pub(super) struct ConfigFile {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    identity: IdentitySection,
    #[serde(default)]
    connector: ConnectorSection,
    #[serde(default)]
    storage: StorageSection,
}

#[derive(Debug, Deserialize, Default)]
struct ServerSection {
    host: Option<String>,
    port: Option<u16>,
    public_base_url: Option<String>,
    max_body_bytes: Option<usize>,
    #[serde(default)]
    cors_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct IdentitySection {
    supabase_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ConnectorSection {
    backend: Option<String>,
    api_base_url: Option<String>,
    project_id: Option<String>,
    environment: Option<String>,
    timeout_secs: Option<u64>,
    #[serde(default)]
    allowed_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageSection {
    db_url: Option<String>,
    path: Option<String>,
    allow_invalid_certs: Option<bool>,
}

impl ServiceConfig {
    /// Environment (after `.env`) over the optional `HUB_CONFIG_PATH` TOML file.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let file = match env_var_non_empty("HUB_CONFIG_PATH") {
            Some(path) => load_config_file(Path::new(&path))?,
            None => ConfigFile::default(),
        };
        Self::from_lookup(|key| env::var(key).ok(), file)
    }

    pub(super) fn from_lookup<F>(lookup: F, file: ConfigFile) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let ConfigFile {
            server,
            identity,
            connector,
            storage,
        } = file;

        let host = get("HUB_HOST")
            .or(server.host)
            .unwrap_or_else(|| "0.0.0.0".to_string());
        let port = match get("HUB_PORT") {
            Some(value) => parse_value("HUB_PORT", &value)?,
            None => server.port.unwrap_or(DEFAULT_PORT),
        };
        let public_base_url = get("HUB_PUBLIC_BASE_URL")
            .or(server.public_base_url)
            .map(|url| url.trim_end_matches('/').to_string());
        let max_body_bytes = match get("HUB_MAX_BODY_BYTES") {
            Some(value) => parse_value::<usize>("HUB_MAX_BODY_BYTES", &value)?,
            None => server.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES),
        };
        if max_body_bytes == 0 {
            return Err(ConfigError::Invalid {
                key: "HUB_MAX_BODY_BYTES",
                value: "0".to_string(),
            });
        }
        let cors_origins = get("HUB_CORS_ORIGINS")
            .map(|value| split_list(&value))
            .unwrap_or(server.cors_origins);

        let identity = IdentityConfig {
            supabase_url: get("SUPABASE_PROJECT_URL")
                .or(identity.supabase_url)
                .map(|url| url.trim_end_matches('/').to_string())
                .ok_or(ConfigError::Missing("SUPABASE_PROJECT_URL"))?,
            anon_key: get("SUPABASE_ANON_KEY").unwrap_or_default(),
        };

        let backend = get("CONNECTOR_BACKEND")
            .or(connector.backend)
            .unwrap_or_else(|| "pipedream".to_string())
            .to_ascii_lowercase();
        let connector = match backend.as_str() {
            "memory" => ConnectorBackend::Memory,
            "pipedream" => {
                let timeout_secs = match get("PIPEDREAM_TIMEOUT_SECS") {
                    Some(value) => parse_value::<u64>("PIPEDREAM_TIMEOUT_SECS", &value)?,
                    None => connector.timeout_secs.unwrap_or(30),
                };
                ConnectorBackend::Pipedream(PipedreamConfig {
                    api_base_url: get("PIPEDREAM_API_BASE_URL")
                        .or(connector.api_base_url)
                        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
                    project_id: get("PIPEDREAM_PROJECT_ID")
                        .or(connector.project_id)
                        .ok_or(ConfigError::Missing("PIPEDREAM_PROJECT_ID"))?,
                    environment: get("PIPEDREAM_PROJECT_ENVIRONMENT")
                        .or(connector.environment)
                        .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string()),
                    client_id: get("PIPEDREAM_CLIENT_ID")
                        .ok_or(ConfigError::Missing("PIPEDREAM_CLIENT_ID"))?,
                    client_secret: get("PIPEDREAM_CLIENT_SECRET")
                        .ok_or(ConfigError::Missing("PIPEDREAM_CLIENT_SECRET"))?,
                    request_timeout: Duration::from_secs(timeout_secs.max(1)),
                    allowed_origins: get("PIPEDREAM_ALLOWED_ORIGINS")
                        .map(|value| split_list(&value))
                        .unwrap_or(connector.allowed_origins),
                })
            }
            _ => {
                return Err(ConfigError::Invalid {
                    key: "CONNECTOR_BACKEND",
                    value: backend.clone(),
                })
            }
        };

        let account_store = match get("ACCOUNT_STORE_DB_URL").or(storage.db_url) {
            Some(db_url) => AccountStoreBackend::Postgres {
                db_url,
                allow_invalid_certs: get("ACCOUNT_STORE_TLS_ALLOW_INVALID_CERTS")
                    .map(|value| env_flag_value(&value))
                    .or(storage.allow_invalid_certs)
                    .unwrap_or(false),
            },
            None => AccountStoreBackend::Sqlite {
                path: resolve_path(
                    get("ACCOUNT_STORE_PATH")
                        .or(storage.path)
                        .unwrap_or_else(|| DEFAULT_ACCOUNT_STORE_PATH.to_string()),
                )?,
            },
        };

        Ok(Self {
            host,
            port,
            public_base_url,
            max_body_bytes,
            cors_origins,
            identity,
            connector,
            account_store,
        })
    }
}

pub(super) fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<ConfigFile>(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_value<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse::<T>().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

fn env_var_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_flag_value(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().trim_end_matches('/').to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn resolve_path(raw: String) -> Result<PathBuf, ConfigError> {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(env::current_dir()
            .map_err(ConfigError::WorkingDir)?
            .join(path))
    }
}
