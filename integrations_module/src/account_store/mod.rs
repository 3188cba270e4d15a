//! Local cache of connected accounts, keyed by external user id.
//!
//! The cache holds a credential-free projection of what the connector
//! platform reported at the last sync. Writes are whole-user replacements so
//! re-applying the same sync is harmless.

mod postgres;
mod sqlite;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::connector::models::storage_precision;
use crate::connector::ConnectedAccount;

pub use self::postgres::PostgresAccountStore;
pub use self::sqlite::SqliteAccountStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSyncRecord {
    pub external_user_id: String,
    pub synced_at: DateTime<Utc>,
    pub account_count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub upserted: usize,
    pub removed: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum AccountStoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("postgres error: {0}")]
    Postgres(#[from] ::postgres::Error),
    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("account {account_id} belongs to {owner}, not {external_user_id}")]
    ForeignAccount {
        account_id: String,
        owner: String,
        external_user_id: String,
    },
    #[error("config error: {0}")]
    Config(String),
}

pub trait AccountStore: Send + Sync {
    /// Cached accounts for one user, in the order the platform last reported.
    fn list_user_accounts(
        &self,
        external_user_id: &str,
    ) -> Result<Vec<ConnectedAccount>, AccountStoreError>;

    /// Make the cached rows for `external_user_id` exactly `accounts`.
    ///
    /// Rows missing from `accounts` are deleted. Either every change lands or
    /// none does.
    fn replace_user_accounts(
        &self,
        external_user_id: &str,
        accounts: &[ConnectedAccount],
        synced_at: DateTime<Utc>,
    ) -> Result<ReconcileSummary, AccountStoreError>;

    fn sync_record(
        &self,
        external_user_id: &str,
    ) -> Result<Option<AccountSyncRecord>, AccountStoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountStoreBackend {
    Sqlite { path: PathBuf },
    Postgres { db_url: String, allow_invalid_certs: bool },
}

pub fn build_account_store(
    backend: &AccountStoreBackend,
) -> Result<Arc<dyn AccountStore>, AccountStoreError> {
    match backend {
        AccountStoreBackend::Sqlite { path } => {
            info!("account store backend=sqlite path={}", path.display());
            Ok(Arc::new(SqliteAccountStore::new(path)?))
        }
        AccountStoreBackend::Postgres {
            db_url,
            allow_invalid_certs,
        } => {
            info!("account store backend=postgres db_url=***");
            Ok(Arc::new(PostgresAccountStore::new(
                db_url,
                *allow_invalid_certs,
            )?))
        }
    }
}

pub(crate) fn ensure_owned(
    external_user_id: &str,
    accounts: &[ConnectedAccount],
) -> Result<(), AccountStoreError> {
    match accounts
        .iter()
        .find(|account| account.external_user_id != external_user_id)
    {
        Some(account) => Err(AccountStoreError::ForeignAccount {
            account_id: account.id.clone(),
            owner: account.external_user_id.clone(),
            external_user_id: external_user_id.to_string(),
        }),
        None => Ok(()),
    }
}

fn format_datetime(value: DateTime<Utc>) -> String {
    storage_precision(value).to_rfc3339()
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

#[cfg(test)]
mod tests;
