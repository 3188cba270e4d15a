use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use postgres_native_tls::MakeTlsConnector;
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;
use tracing::error;

use crate::connector::models::storage_precision;
use crate::connector::{AppMetadata, ConnectedAccount};

use super::{ensure_owned, AccountStore, AccountStoreError, AccountSyncRecord, ReconcileSummary};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS connected_accounts (
    account_id TEXT PRIMARY KEY,
    external_user_id TEXT NOT NULL,
    app_slug TEXT NOT NULL,
    display_name TEXT,
    healthy BOOLEAN NOT NULL,
    dead BOOLEAN,
    app_name TEXT,
    auth_type TEXT,
    categories TEXT NOT NULL,
    position INTEGER NOT NULL,
    created_at TIMESTAMPTZ,
    updated_at TIMESTAMPTZ,
    synced_at TIMESTAMPTZ NOT NULL
);
ALTER TABLE connected_accounts ALTER COLUMN created_at DROP NOT NULL;
ALTER TABLE connected_accounts ALTER COLUMN updated_at DROP NOT NULL;
CREATE INDEX IF NOT EXISTS idx_connected_accounts_user
    ON connected_accounts (external_user_id, app_slug);
CREATE TABLE IF NOT EXISTS account_syncs (
    external_user_id TEXT PRIMARY KEY,
    synced_at TIMESTAMPTZ NOT NULL,
    account_count BIGINT NOT NULL
);
"#;

type PgPool = Pool<PostgresConnectionManager<MakeTlsConnector>>;

/// Logs pool-level connection errors instead of dropping them silently.
#[derive(Debug)]
struct LoggingErrorHandler;

impl r2d2::HandleError<::postgres::Error> for LoggingErrorHandler {
    fn handle_error(&self, err: ::postgres::Error) {
        error!("account store postgres pool error: {:?}", err);
    }
}

pub struct PostgresAccountStore {
    pool: Option<PgPool>,
}

impl PostgresAccountStore {
    pub fn new(db_url: &str, allow_invalid_certs: bool) -> Result<Self, AccountStoreError> {
        let config: ::postgres::Config = db_url.parse()?;

        let mut tls_builder = native_tls::TlsConnector::builder();
        if allow_invalid_certs {
            tls_builder.danger_accept_invalid_certs(true);
            tls_builder.danger_accept_invalid_hostnames(true);
        }
        let tls_connector = tls_builder
            .build()
            .map_err(|e| AccountStoreError::Config(e.to_string()))?;
        let tls = MakeTlsConnector::new(tls_connector);

        let manager = PostgresConnectionManager::new(config, tls);
        let pool = Pool::builder()
            .max_size(16)
            .min_idle(Some(1))
            .connection_timeout(Duration::from_secs(5))
            .idle_timeout(Some(Duration::from_secs(60)))
            .error_handler(Box::new(LoggingErrorHandler))
            .build(manager)?;

        let store = Self { pool: Some(pool) };
        store.conn()?.batch_execute(SCHEMA)?;
        Ok(store)
    }

    fn conn(
        &self,
    ) -> Result<PooledConnection<PostgresConnectionManager<MakeTlsConnector>>, AccountStoreError>
    {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| AccountStoreError::Config("account store pool dropped".to_string()))?;
        Ok(pool.get()?)
    }
}

impl AccountStore for PostgresAccountStore {
    fn list_user_accounts(
        &self,
        external_user_id: &str,
    ) -> Result<Vec<ConnectedAccount>, AccountStoreError> {
        let mut conn = self.conn()?;
        let rows = conn.query(
            "SELECT account_id, external_user_id, app_slug, display_name, healthy, dead,
                    app_name, auth_type, categories, created_at, updated_at
             FROM connected_accounts
             WHERE external_user_id = $1
             ORDER BY position, account_id",
            &[&external_user_id],
        )?;

        let mut accounts = Vec::with_capacity(rows.len());
        for row in rows {
            let categories: String = row.get(8);
            accounts.push(ConnectedAccount {
                id: row.get(0),
                external_user_id: row.get(1),
                app_slug: row.get(2),
                name: row.get(3),
                healthy: row.get(4),
                dead: row.get(5),
                created_at: row.get(9),
                updated_at: row.get(10),
                app: AppMetadata {
                    name: row.get(6),
                    auth_type: row.get(7),
                    categories: serde_json::from_str(&categories)?,
                },
                credentials: None,
            });
        }
        Ok(accounts)
    }

    fn replace_user_accounts(
        &self,
        external_user_id: &str,
        accounts: &[ConnectedAccount],
        synced_at: DateTime<Utc>,
    ) -> Result<ReconcileSummary, AccountStoreError> {
        ensure_owned(external_user_id, accounts)?;
        let mut conn = self.conn()?;
        let mut tx = conn.transaction()?;

        let existing: Vec<String> = tx
            .query(
                "SELECT account_id FROM connected_accounts WHERE external_user_id = $1
                 FOR UPDATE",
                &[&external_user_id],
            )?
            .iter()
            .map(|row| row.get(0))
            .collect();
        let incoming: HashSet<&str> = accounts.iter().map(|account| account.id.as_str()).collect();

        let mut summary = ReconcileSummary::default();
        for stale in existing.iter().filter(|id| !incoming.contains(id.as_str())) {
            summary.removed += tx.execute(
                "DELETE FROM connected_accounts WHERE account_id = $1",
                &[stale],
            )? as usize;
        }

        for (position, account) in accounts.iter().enumerate() {
            let categories = serde_json::to_string(&account.app.categories)?;
            let position = position as i32;
            // TIMESTAMPTZ holds microseconds.
            let created_at = account.created_at.map(storage_precision);
            let updated_at = account.updated_at.map(storage_precision);
            tx.execute(
                "INSERT INTO connected_accounts (
                    account_id, external_user_id, app_slug, display_name, healthy, dead,
                    app_name, auth_type, categories, position, created_at, updated_at, synced_at
                 ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                 ON CONFLICT (account_id) DO UPDATE SET
                    external_user_id = EXCLUDED.external_user_id,
                    app_slug = EXCLUDED.app_slug,
                    display_name = EXCLUDED.display_name,
                    healthy = EXCLUDED.healthy,
                    dead = EXCLUDED.dead,
                    app_name = EXCLUDED.app_name,
                    auth_type = EXCLUDED.auth_type,
                    categories = EXCLUDED.categories,
                    position = EXCLUDED.position,
                    created_at = EXCLUDED.created_at,
                    updated_at = EXCLUDED.updated_at,
                    synced_at = EXCLUDED.synced_at",
                &[
                    &account.id,
                    &account.external_user_id,
                    &account.app_slug,
                    &account.name,
                    &account.healthy,
                    &account.dead,
                    &account.app.name,
                    &account.app.auth_type,
                    &categories,
                    &position,
                    &created_at,
                    &updated_at,
                    &synced_at,
                ],
            )?;
            summary.upserted += 1;
        }

        let account_count = accounts.len() as i64;
        tx.execute(
            "INSERT INTO account_syncs (external_user_id, synced_at, account_count)
             VALUES ($1, $2, $3)
             ON CONFLICT (external_user_id) DO UPDATE SET
                synced_at = EXCLUDED.synced_at,
                account_count = EXCLUDED.account_count",
            &[&external_user_id, &synced_at, &account_count],
        )?;

        tx.commit()?;
        Ok(summary)
    }

    fn sync_record(
        &self,
        external_user_id: &str,
    ) -> Result<Option<AccountSyncRecord>, AccountStoreError> {
        let mut conn = self.conn()?;
        let row = conn.query_opt(
            "SELECT external_user_id, synced_at, account_count
             FROM account_syncs
             WHERE external_user_id = $1",
            &[&external_user_id],
        )?;
        Ok(row.map(|row| {
            let account_count: i64 = row.get(2);
            AccountSyncRecord {
                external_user_id: row.get(0),
                synced_at: row.get(1),
                account_count: account_count.max(0) as usize,
            }
        }))
    }
}

impl Drop for PostgresAccountStore {
    fn drop(&mut self) {
        // Dropping an r2d2 pool blocks; keep that off async worker threads.
        if let Some(pool) = self.pool.take() {
            std::thread::spawn(move || drop(pool));
        }
    }
}
