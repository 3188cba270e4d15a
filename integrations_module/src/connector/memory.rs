//! In-process connector backend for local runs and tests.
//!
//! Holds a fixed account roster, records every deployment, and counts
//! calls so callers can assert which paths touched the "remote".

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};

use super::models::{
    AccountFilter, Component, ComponentQuery, ConnectToken, ConnectedAccount,
    DeployTriggerRequest, DeployedTrigger,
};
use super::{ConnectorError, ConnectorGateway};

#[derive(Debug, Default)]
pub struct InMemoryGateway {
    accounts: Mutex<Vec<ConnectedAccount>>,
    components: Mutex<Vec<Component>>,
    deployed: Mutex<Vec<(String, DeployedTrigger)>>,
    failure: Mutex<Option<ConnectorError>>,
    deploy_failure: Mutex<Option<ConnectorError>>,
    list_calls: AtomicUsize,
    deploy_calls: AtomicUsize,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the full account roster, in provider order.
    pub fn set_accounts(&self, accounts: Vec<ConnectedAccount>) {
        *locked(&self.accounts) = accounts;
    }

    pub fn set_components(&self, components: Vec<Component>) {
        *locked(&self.components) = components;
    }

    /// Make every subsequent call fail with `err` until cleared.
    pub fn fail_with(&self, err: Option<ConnectorError>) {
        *locked(&self.failure) = err;
    }

    /// Fail only deployments, leaving account listing intact.
    pub fn fail_deploys_with(&self, err: Option<ConnectorError>) {
        *locked(&self.deploy_failure) = err;
    }

    pub fn list_account_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn deploy_calls(&self) -> usize {
        self.deploy_calls.load(Ordering::SeqCst)
    }

    pub fn deployed_for(&self, external_user_id: &str) -> Vec<DeployedTrigger> {
        locked(&self.deployed)
            .iter()
            .filter(|(owner, _)| owner == external_user_id)
            .map(|(_, trigger)| trigger.clone())
            .collect()
    }

    fn check_failure(&self) -> Result<(), ConnectorError> {
        match locked(&self.failure).clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn matches_filter(account: &ConnectedAccount, filter: &AccountFilter) -> bool {
    filter
        .external_user_id
        .as_ref()
        .map_or(true, |user| &account.external_user_id == user)
        && filter
            .app
            .as_ref()
            .map_or(true, |app| &account.app_slug == app)
}

#[async_trait]
impl ConnectorGateway for InMemoryGateway {
    async fn list_accounts(
        &self,
        filter: &AccountFilter,
    ) -> Result<Vec<ConnectedAccount>, ConnectorError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        Ok(locked(&self.accounts)
            .iter()
            .filter(|account| matches_filter(account, filter))
            .map(|account| {
                if filter.include_credentials {
                    account.clone()
                } else {
                    account.clone().without_credentials()
                }
            })
            .collect())
    }

    async fn get_components(
        &self,
        query: &ComponentQuery,
    ) -> Result<Vec<Component>, ConnectorError> {
        self.check_failure()?;
        let needle = query.query.as_deref().map(|q| q.to_ascii_lowercase());
        Ok(locked(&self.components)
            .iter()
            .filter(|component| {
                query
                    .app
                    .as_ref()
                    .map_or(true, |app| component.key.starts_with(&format!("{}-", app)))
            })
            .filter(|component| {
                needle.as_ref().map_or(true, |needle| {
                    component.name.to_ascii_lowercase().contains(needle)
                        || component.key.contains(needle.as_str())
                })
            })
            .filter(|component| {
                query.component_type.map_or(true, |kind| {
                    component.component_type.as_deref() == Some(kind.as_str())
                })
            })
            .cloned()
            .collect())
    }

    async fn get_component_definition(&self, key: &str) -> Result<Component, ConnectorError> {
        self.check_failure()?;
        locked(&self.components)
            .iter()
            .find(|component| component.key == key)
            .cloned()
            .ok_or_else(|| ConnectorError::Rejected {
                status: 404,
                message: format!("component {} not found", key),
            })
    }

    async fn create_connect_token(
        &self,
        external_user_id: &str,
    ) -> Result<ConnectToken, ConnectorError> {
        self.check_failure()?;
        let expires_at = Utc::now() + chrono::Duration::hours(4);
        Ok(ConnectToken {
            token: format!("ctok_{:x}", md5::compute(external_user_id.as_bytes())),
            expires_at: expires_at.to_rfc3339(),
            connect_link_url: None,
        })
    }

    async fn list_triggers(
        &self,
        external_user_id: &str,
    ) -> Result<Vec<DeployedTrigger>, ConnectorError> {
        self.check_failure()?;
        Ok(self.deployed_for(external_user_id))
    }

    async fn deploy_trigger(
        &self,
        request: &DeployTriggerRequest,
    ) -> Result<DeployedTrigger, ConnectorError> {
        self.deploy_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        if let Some(err) = locked(&self.deploy_failure).clone() {
            return Err(err);
        }

        let mut deployed = locked(&self.deployed);
        let mut extra = Map::new();
        extra.insert(
            "webhook_url".to_string(),
            Value::String(request.webhook_url.clone()),
        );
        extra.insert(
            "created_at".to_string(),
            Value::from(Utc::now().timestamp()),
        );
        let trigger = DeployedTrigger {
            id: format!("dc_{}", deployed.len() + 1),
            component_id: Some(format!("sc_{}", deployed.len() + 1)),
            component_key: Some(request.trigger_id.clone()),
            owner_id: Some(request.external_user_id.clone()),
            configured_props: request.configured_props.clone(),
            active: Some(true),
            extra,
        };
        deployed.push((request.external_user_id.clone(), trigger.clone()));
        Ok(trigger)
    }
}
