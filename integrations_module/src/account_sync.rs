//! Keeps the local account cache in step with the connector platform.
//!
//! Reads come from the cache when a filter names only a user; anything more
//! specific goes to the platform. A sync replaces the user's cached rows in
//! one store transaction, so a failed remote call leaves the last good
//! snapshot in place.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task;
use tracing::{error, info, warn};

use crate::account_store::{AccountStore, AccountStoreError};
use crate::connector::{AccountFilter, ConnectedAccount, ConnectorError, ConnectorGateway};

/// Where an account read is allowed to be served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPolicy {
    CacheEligible,
    MustHitRemote,
}

impl ReadPolicy {
    /// Only a bare external-user filter can be answered from the cache. The
    /// cache holds no credentials and is not indexed by OAuth app, and an
    /// unscoped listing spans users.
    pub fn for_filter(filter: &AccountFilter) -> Self {
        if filter.app.is_some() || filter.oauth_app_id.is_some() || filter.include_credentials {
            return ReadPolicy::MustHitRemote;
        }
        match filter.external_user_id {
            Some(_) => ReadPolicy::CacheEligible,
            None => ReadPolicy::MustHitRemote,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountSource {
    Cache,
    Remote,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountListing {
    pub accounts: Vec<ConnectedAccount>,
    pub source: AccountSource,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] ConnectorError),
    #[error("account store error: {0}")]
    Store(#[from] AccountStoreError),
    #[error("account store task failed: {0}")]
    Join(String),
    #[error("external user id is required")]
    MissingUser,
}

pub struct AccountSyncService {
    gateway: Arc<dyn ConnectorGateway>,
    store: Arc<dyn AccountStore>,
    user_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl AccountSyncService {
    pub fn new(gateway: Arc<dyn ConnectorGateway>, store: Arc<dyn AccountStore>) -> Self {
        Self {
            gateway,
            store,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Cached accounts for `external_user_id`. Never calls the platform.
    pub async fn get_user_accounts(
        &self,
        external_user_id: &str,
    ) -> Result<Vec<ConnectedAccount>, SyncError> {
        let user = required_user(external_user_id)?;
        self.with_store(move |store| store.list_user_accounts(&user))
            .await
    }

    /// Fetch the user's accounts from the platform and make the cache match.
    pub async fn sync_user_accounts(
        &self,
        external_user_id: &str,
    ) -> Result<Vec<ConnectedAccount>, SyncError> {
        let user = required_user(external_user_id)?;
        let lock = self.user_lock(&user);
        let result = {
            let _guard = lock.lock().await;
            self.sync_locked(&user).await
        };
        self.release_user_lock(&user, lock);
        result
    }

    async fn sync_locked(&self, user: &str) -> Result<Vec<ConnectedAccount>, SyncError> {
        let remote = self
            .gateway
            .list_accounts(&AccountFilter::for_user(user))
            .await
            .map_err(|err| {
                warn!("account sync for {} failed upstream: {}", user, err);
                err
            })?;
        let accounts: Vec<ConnectedAccount> = remote
            .into_iter()
            .map(ConnectedAccount::without_credentials)
            .collect();

        let owner = user.to_string();
        let rows = accounts.clone();
        let summary = self
            .with_store(move |store| store.replace_user_accounts(&owner, &rows, Utc::now()))
            .await?;
        info!(
            "account sync for {} complete: {} upserted, {} removed",
            user, summary.upserted, summary.removed
        );
        Ok(accounts)
    }

    /// Answer an account listing according to [`ReadPolicy::for_filter`].
    ///
    /// A cache-eligible read for a user who has never been synced triggers a
    /// sync, so first reads reflect the platform rather than an empty cache.
    pub async fn list_accounts(&self, filter: &AccountFilter) -> Result<AccountListing, SyncError> {
        let filter = filter.clone().normalized();
        let user = match (ReadPolicy::for_filter(&filter), filter.external_user_id.clone()) {
            (ReadPolicy::CacheEligible, Some(user)) => user,
            _ => {
                let accounts = self.gateway.list_accounts(&filter).await?;
                return Ok(AccountListing {
                    accounts,
                    source: AccountSource::Remote,
                });
            }
        };

        let lookup = user.clone();
        let record = self
            .with_store(move |store| store.sync_record(&lookup))
            .await?;
        if record.is_some() {
            let accounts = self.get_user_accounts(&user).await?;
            return Ok(AccountListing {
                accounts,
                source: AccountSource::Cache,
            });
        }

        let accounts = self.sync_user_accounts(&user).await?;
        Ok(AccountListing {
            accounts,
            source: AccountSource::Remote,
        })
    }

    async fn with_store<T, F>(&self, op: F) -> Result<T, SyncError>
    where
        F: FnOnce(&dyn AccountStore) -> Result<T, AccountStoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|e| {
                error!("spawn_blocking panicked: {}", e);
                SyncError::Join(e.to_string())
            })?
            .map_err(SyncError::from)
    }

    fn user_lock(&self, user: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .user_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(user.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Drop the map entry once no other task holds or waits on it.
    fn release_user_lock(&self, user: &str, lock: Arc<AsyncMutex<()>>) {
        let mut locks = self
            .user_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(user);
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.user_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn required_user(external_user_id: &str) -> Result<String, SyncError> {
    let user = external_user_id.trim();
    if user.is_empty() {
        return Err(SyncError::MissingUser);
    }
    Ok(user.to_string())
}
