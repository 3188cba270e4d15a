use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::connector::{AppMetadata, ConnectedAccount};

use super::{
    ensure_owned, format_datetime, parse_datetime, AccountStore, AccountStoreError,
    AccountSyncRecord, ReconcileSummary,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS connected_accounts (
    account_id TEXT PRIMARY KEY,
    external_user_id TEXT NOT NULL,
    app_slug TEXT NOT NULL,
    display_name TEXT,
    healthy INTEGER NOT NULL,
    dead INTEGER,
    app_name TEXT,
    auth_type TEXT,
    categories TEXT NOT NULL,
    position INTEGER NOT NULL,
    created_at TEXT,
    updated_at TEXT,
    synced_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_connected_accounts_user
    ON connected_accounts (external_user_id, app_slug);
CREATE TABLE IF NOT EXISTS account_syncs (
    external_user_id TEXT PRIMARY KEY,
    synced_at TEXT NOT NULL,
    account_count INTEGER NOT NULL
);
"#;

/// File-backed store; each call opens its own connection.
#[derive(Debug, Clone)]
pub struct SqliteAccountStore {
    path: PathBuf,
}

type AccountRow = (
    String,
    String,
    String,
    Option<String>,
    bool,
    Option<bool>,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
);

impl SqliteAccountStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, AccountStoreError> {
        let store = Self { path: path.into() };
        let _ = store.open()?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection, AccountStoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(conn)
    }
}

fn row_to_account(row: AccountRow) -> Result<ConnectedAccount, AccountStoreError> {
    let (
        id,
        external_user_id,
        app_slug,
        name,
        healthy,
        dead,
        app_name,
        auth_type,
        categories,
        created_at,
        updated_at,
    ) = row;
    Ok(ConnectedAccount {
        id,
        external_user_id,
        app_slug,
        name,
        healthy,
        dead,
        created_at: created_at.as_deref().map(parse_datetime).transpose()?,
        updated_at: updated_at.as_deref().map(parse_datetime).transpose()?,
        app: AppMetadata {
            name: app_name,
            auth_type,
            categories: serde_json::from_str(&categories)?,
        },
        credentials: None,
    })
}

impl AccountStore for SqliteAccountStore {
    fn list_user_accounts(
        &self,
        external_user_id: &str,
    ) -> Result<Vec<ConnectedAccount>, AccountStoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT account_id, external_user_id, app_slug, display_name, healthy, dead,
                    app_name, auth_type, categories, created_at, updated_at
             FROM connected_accounts
             WHERE external_user_id = ?1
             ORDER BY position, account_id",
        )?;
        let rows = stmt.query_map(params![external_user_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, bool>(4)?,
                row.get::<_, Option<bool>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, Option<String>>(9)?,
                row.get::<_, Option<String>>(10)?,
            ))
        })?;

        let mut accounts = Vec::new();
        for row in rows {
            accounts.push(row_to_account(row?)?);
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
        let mut conn = self.open()?;
        let tx = conn.transaction()?;

        let existing: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT account_id FROM connected_accounts WHERE external_user_id = ?1",
            )?;
            let rows = stmt.query_map(params![external_user_id], |row| row.get::<_, String>(0))?;
            let ids = rows.collect::<Result<Vec<_>, _>>()?;
            ids
        };
        let incoming: HashSet<&str> = accounts.iter().map(|account| account.id.as_str()).collect();

        let mut summary = ReconcileSummary::default();
        for stale in existing.iter().filter(|id| !incoming.contains(id.as_str())) {
            summary.removed += tx.execute(
                "DELETE FROM connected_accounts WHERE account_id = ?1",
                params![stale],
            )?;
        }

        let synced = format_datetime(synced_at);
        for (position, account) in accounts.iter().enumerate() {
            tx.execute(
                "INSERT INTO connected_accounts (
                    account_id, external_user_id, app_slug, display_name, healthy, dead,
                    app_name, auth_type, categories, position, created_at, updated_at, synced_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(account_id) DO UPDATE SET
                    external_user_id = excluded.external_user_id,
                    app_slug = excluded.app_slug,
                    display_name = excluded.display_name,
                    healthy = excluded.healthy,
                    dead = excluded.dead,
                    app_name = excluded.app_name,
                    auth_type = excluded.auth_type,
                    categories = excluded.categories,
                    position = excluded.position,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at,
                    synced_at = excluded.synced_at",
                params![
                    account.id,
                    account.external_user_id,
                    account.app_slug,
                    account.name,
                    account.healthy,
                    account.dead,
                    account.app.name,
                    account.app.auth_type,
                    serde_json::to_string(&account.app.categories)?,
                    position as i64,
                    account.created_at.map(format_datetime),
                    account.updated_at.map(format_datetime),
                    synced,
                ],
            )?;
            summary.upserted += 1;
        }

        tx.execute(
            "INSERT INTO account_syncs (external_user_id, synced_at, account_count)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(external_user_id) DO UPDATE SET
                synced_at = excluded.synced_at,
                account_count = excluded.account_count",
            params![external_user_id, synced, accounts.len() as i64],
        )?;

        tx.commit()?;
        Ok(summary)
    }

    fn sync_record(
        &self,
        external_user_id: &str,
    ) -> Result<Option<AccountSyncRecord>, AccountStoreError> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                "SELECT external_user_id, synced_at, account_count
                 FROM account_syncs
                 WHERE external_user_id = ?1",
                params![external_user_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((external_user_id, synced_at, account_count)) => Ok(Some(AccountSyncRecord {
                external_user_id,
                synced_at: parse_datetime(&synced_at)?,
                account_count: account_count.max(0) as usize,
            })),
            None => Ok(None),
        }
    }
}
