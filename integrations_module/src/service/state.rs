use std::sync::Arc;

use crate::account_store::AccountStore;
use crate::account_sync::AccountSyncService;
use crate::connector::ConnectorGateway;
use crate::identity::IdentityResolver;
use crate::triggers::TriggerDeploymentService;
use crate::webhook::{WebhookReceiver, WebhookSink};

use super::config::ServiceConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub identity: Arc<dyn IdentityResolver>,
    pub gateway: Arc<dyn ConnectorGateway>,
    pub accounts: Arc<AccountSyncService>,
    pub triggers: Arc<TriggerDeploymentService>,
    pub webhooks: Arc<WebhookReceiver>,
}

impl AppState {
    /// Wire the services around one gateway and one account store.
    pub fn new(
        config: Arc<ServiceConfig>,
        identity: Arc<dyn IdentityResolver>,
        gateway: Arc<dyn ConnectorGateway>,
        store: Arc<dyn AccountStore>,
        sink: Arc<dyn WebhookSink>,
    ) -> Self {
        let accounts = Arc::new(AccountSyncService::new(gateway.clone(), store));
        let triggers = Arc::new(TriggerDeploymentService::new(
            gateway.clone(),
            config.public_base_url.clone(),
        ));
        Self {
            config,
            identity,
            gateway,
            accounts,
            triggers,
            webhooks: Arc::new(WebhookReceiver::new(sink)),
        }
    }
}
