//! Deploys provider triggers bound to one of the user's connected accounts.
//!
//! Accounts are always read from the connector platform here, never from the
//! cache, so an account connected a moment ago can back a trigger right away.
//! Nothing is persisted locally. Deployments carry no idempotency key: a
//! retried request can leave duplicate triggers upstream.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::connector::{
    AccountFilter, ConnectedAccount, ConnectorError, ConnectorGateway, DeployTriggerRequest,
    DeployedTrigger,
};

/// Every trigger this hub knows how to configure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TriggerType {
    #[default]
    GmailNewEmailReceived,
    GmailNewAttachmentReceived,
    NotionNewPage,
    NotionUpdatedPage,
}

impl TriggerType {
    pub const ALL: [TriggerType; 4] = [
        TriggerType::GmailNewEmailReceived,
        TriggerType::GmailNewAttachmentReceived,
        TriggerType::NotionNewPage,
        TriggerType::NotionUpdatedPage,
    ];

    /// Component key on the connector platform.
    pub fn key(self) -> &'static str {
        match self {
            TriggerType::GmailNewEmailReceived => "gmail-new-email-received",
            TriggerType::GmailNewAttachmentReceived => "gmail-new-attachment-received",
            TriggerType::NotionNewPage => "notion-new-page",
            TriggerType::NotionUpdatedPage => "notion-updated-page",
        }
    }

    pub fn app_slug(self) -> &'static str {
        match self {
            TriggerType::GmailNewEmailReceived | TriggerType::GmailNewAttachmentReceived => {
                "gmail"
            }
            TriggerType::NotionNewPage | TriggerType::NotionUpdatedPage => "notion",
        }
    }

    pub fn app_name(self) -> &'static str {
        match self {
            TriggerType::GmailNewEmailReceived | TriggerType::GmailNewAttachmentReceived => {
                "Gmail"
            }
            TriggerType::NotionNewPage | TriggerType::NotionUpdatedPage => "Notion",
        }
    }

    /// `<provider>_<event>` suffix of the default webhook route.
    pub fn webhook_slug(self) -> &'static str {
        match self {
            TriggerType::GmailNewEmailReceived => "gmail_new_email",
            TriggerType::GmailNewAttachmentReceived => "gmail_new_attachment",
            TriggerType::NotionNewPage => "notion_new_page",
            TriggerType::NotionUpdatedPage => "notion_updated_page",
        }
    }

    /// Props that bind the trigger to `account_id`.
    pub fn configured_props(self, account_id: &str) -> Value {
        match self {
            TriggerType::GmailNewEmailReceived | TriggerType::GmailNewAttachmentReceived => {
                json!({ "gmail": { "authProvisionId": account_id } })
            }
            TriggerType::NotionNewPage | TriggerType::NotionUpdatedPage => {
                json!({ "notion": { "authProvisionId": account_id } })
            }
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for TriggerType {
    type Err = TriggerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim();
        TriggerType::ALL
            .into_iter()
            .find(|kind| kind.key() == wanted)
            .ok_or_else(|| TriggerError::UnsupportedTriggerType(wanted.to_string()))
    }
}

/// Which account should back the trigger.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AccountSelector {
    /// First eligible account in provider order.
    #[default]
    FirstEligible,
    Account(String),
}

impl AccountSelector {
    pub fn from_optional(account_id: Option<String>) -> Self {
        match account_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
        {
            Some(id) => AccountSelector::Account(id),
            None => AccountSelector::FirstEligible,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentResult {
    #[serde(flatten)]
    pub trigger: DeployedTrigger,
    pub account_id: String,
    pub account_name: String,
    pub webhook_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("unsupported trigger type: {0}")]
    UnsupportedTriggerType(String),
    #[error("no {app_name} account connected for user {external_user_id}; connect one first")]
    NoAccountFound {
        app_name: &'static str,
        external_user_id: String,
    },
    #[error("{0}")]
    AccountNotEligible(String),
    #[error("no webhook url given and no public base url configured")]
    MissingWebhookUrl,
    #[error("external user id is required")]
    MissingUser,
    #[error(transparent)]
    Remote(#[from] ConnectorError),
    #[error("trigger deployment failed: {0}")]
    DeploymentFailed(String),
}

impl TriggerError {
    pub fn code(&self) -> &'static str {
        match self {
            TriggerError::UnsupportedTriggerType(_) => "unsupported_trigger_type",
            TriggerError::NoAccountFound { .. } => "no_account_found",
            TriggerError::AccountNotEligible(_) => "account_not_eligible",
            TriggerError::MissingWebhookUrl | TriggerError::MissingUser => "invalid_request",
            TriggerError::Remote(err) => err.code(),
            TriggerError::DeploymentFailed(_) => "deployment_failed",
        }
    }
}

/// Pick the account that backs a deployment.
///
/// `accounts` must already be narrowed to the trigger's provider, in
/// provider order.
pub fn resolve_account<'a>(
    trigger: TriggerType,
    external_user_id: &str,
    accounts: &'a [ConnectedAccount],
    selector: &AccountSelector,
) -> Result<&'a ConnectedAccount, TriggerError> {
    if accounts.is_empty() {
        return Err(TriggerError::NoAccountFound {
            app_name: trigger.app_name(),
            external_user_id: external_user_id.to_string(),
        });
    }

    match selector {
        AccountSelector::Account(account_id) => {
            match accounts.iter().find(|account| &account.id == account_id) {
                Some(account) if account.is_eligible() => Ok(account),
                Some(_) => Err(TriggerError::AccountNotEligible(format!(
                    "{} account {} is disconnected or unhealthy; reconnect it first",
                    trigger.app_name(),
                    account_id
                ))),
                None => Err(TriggerError::AccountNotEligible(format!(
                    "account {} is not a {} account of user {}",
                    account_id,
                    trigger.app_name(),
                    external_user_id
                ))),
            }
        }
        AccountSelector::FirstEligible => accounts
            .iter()
            .find(|account| account.is_eligible())
            .ok_or_else(|| {
                TriggerError::AccountNotEligible(format!(
                    "none of the {} accounts of user {} are healthy; reconnect one first",
                    trigger.app_name(),
                    external_user_id
                ))
            }),
    }
}

pub struct TriggerDeploymentService {
    gateway: Arc<dyn ConnectorGateway>,
    public_base_url: Option<String>,
}

impl TriggerDeploymentService {
    pub fn new(gateway: Arc<dyn ConnectorGateway>, public_base_url: Option<String>) -> Self {
        Self {
            gateway,
            public_base_url: public_base_url
                .map(|url| url.trim().trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty()),
        }
    }

    /// Webhook the platform should call for `trigger` when the caller gave none.
    pub fn default_webhook_url(&self, trigger: TriggerType) -> Option<String> {
        self.public_base_url
            .as_ref()
            .map(|base| format!("{}/webhooks/{}", base, trigger.webhook_slug()))
    }

    pub async fn deploy_trigger(
        &self,
        external_user_id: &str,
        trigger: TriggerType,
        selector: &AccountSelector,
        webhook_url: Option<String>,
    ) -> Result<DeploymentResult, TriggerError> {
        let external_user_id = external_user_id.trim();
        if external_user_id.is_empty() {
            return Err(TriggerError::MissingUser);
        }
        let webhook_url = match webhook_url.filter(|url| !url.trim().is_empty()) {
            Some(url) => url,
            None => self
                .default_webhook_url(trigger)
                .ok_or(TriggerError::MissingWebhookUrl)?,
        };

        let filter = AccountFilter::for_user(external_user_id).with_app(trigger.app_slug());
        let accounts: Vec<ConnectedAccount> = self
            .gateway
            .list_accounts(&filter)
            .await?
            .into_iter()
            .filter(|account| {
                account.external_user_id == external_user_id
                    && account.app_slug == trigger.app_slug()
            })
            .collect();
        let account = resolve_account(trigger, external_user_id, &accounts, selector)?;

        let request = DeployTriggerRequest {
            external_user_id: external_user_id.to_string(),
            trigger_id: trigger.key().to_string(),
            webhook_url: webhook_url.clone(),
            configured_props: trigger.configured_props(&account.id),
        };
        let deployed = self.gateway.deploy_trigger(&request).await.map_err(|err| {
            warn!(
                "deploy of {} for {} on account {} failed: {}",
                trigger, external_user_id, account.id, err
            );
            TriggerError::DeploymentFailed(err.upstream_message().to_string())
        })?;

        info!(
            "deployed {} for {} on account {} as {}",
            trigger, external_user_id, account.id, deployed.id
        );
        Ok(DeploymentResult {
            trigger: deployed,
            account_id: account.id.clone(),
            account_name: account.display_name(),
            webhook_url,
        })
    }

    pub async fn list_triggers(
        &self,
        external_user_id: &str,
    ) -> Result<Vec<DeployedTrigger>, TriggerError> {
        let external_user_id = external_user_id.trim();
        if external_user_id.is_empty() {
            return Err(TriggerError::MissingUser);
        }
        Ok(self.gateway.list_triggers(external_user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{AppMetadata, InMemoryGateway};
    use chrono::{TimeZone, Utc};

    fn account(id: &str, user: &str, app: &str, healthy: bool) -> ConnectedAccount {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        ConnectedAccount {
            id: id.to_string(),
            external_user_id: user.to_string(),
            app_slug: app.to_string(),
            name: Some(format!("{id}@example.com")),
            healthy,
            dead: None,
            created_at: Some(at),
            updated_at: Some(at),
            app: AppMetadata::default(),
            credentials: None,
        }
    }

    fn service(gateway: &Arc<InMemoryGateway>) -> TriggerDeploymentService {
        TriggerDeploymentService::new(
            gateway.clone(),
            Some("https://hub.example.com/".to_string()),
        )
    }

    #[test]
    fn trigger_types_parse_from_keys() {
        for kind in TriggerType::ALL {
            assert_eq!(kind.key().parse::<TriggerType>().unwrap(), kind);
        }
        assert_eq!(TriggerType::default(), TriggerType::GmailNewEmailReceived);
        assert!(matches!(
            "slack-new-message".parse::<TriggerType>(),
            Err(TriggerError::UnsupportedTriggerType(key)) if key == "slack-new-message"
        ));
    }

    #[test]
    fn configured_props_bind_the_account() {
        assert_eq!(
            TriggerType::GmailNewEmailReceived.configured_props("apn_1"),
            json!({"gmail": {"authProvisionId": "apn_1"}})
        );
        assert_eq!(
            TriggerType::NotionUpdatedPage.configured_props("apn_2"),
            json!({"notion": {"authProvisionId": "apn_2"}})
        );
    }

    #[test]
    fn resolve_account_prefers_first_eligible() {
        let accounts = vec![
            account("apn_sick", "u1", "gmail", false),
            account("apn_a1", "u1", "gmail", true),
            account("apn_a2", "u1", "gmail", true),
        ];
        let chosen = resolve_account(
            TriggerType::GmailNewEmailReceived,
            "u1",
            &accounts,
            &AccountSelector::FirstEligible,
        )
        .unwrap();
        assert_eq!(chosen.id, "apn_a1");
    }

    #[test]
    fn resolve_account_rejects_unknown_or_unhealthy_selection() {
        let accounts = vec![
            account("apn_sick", "u1", "gmail", false),
            account("apn_a1", "u1", "gmail", true),
        ];
        for selected in ["apn_missing", "apn_sick"] {
            let err = resolve_account(
                TriggerType::GmailNewEmailReceived,
                "u1",
                &accounts,
                &AccountSelector::Account(selected.to_string()),
            )
            .unwrap_err();
            assert!(matches!(err, TriggerError::AccountNotEligible(_)));
        }
    }

    #[test]
    fn resolve_account_reports_missing_provider() {
        let err = resolve_account(
            TriggerType::NotionNewPage,
            "u1",
            &[],
            &AccountSelector::FirstEligible,
        )
        .unwrap_err();
        assert!(err.to_string().contains("no Notion account connected"));
        assert_eq!(err.code(), "no_account_found");
    }

    #[test]
    fn selector_treats_blank_ids_as_absent() {
        assert_eq!(
            AccountSelector::from_optional(Some("  ".to_string())),
            AccountSelector::FirstEligible
        );
        assert_eq!(
            AccountSelector::from_optional(Some("apn_1".to_string())),
            AccountSelector::Account("apn_1".to_string())
        );
    }

    #[tokio::test]
    async fn no_provider_account_means_no_deploy_call() {
        let gateway = Arc::new(InMemoryGateway::new());
        gateway.set_accounts(vec![account("apn_n", "u1", "notion", true)]);

        let err = service(&gateway)
            .deploy_trigger(
                "u1",
                TriggerType::GmailNewEmailReceived,
                &AccountSelector::FirstEligible,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TriggerError::NoAccountFound { .. }));
        assert_eq!(gateway.deploy_calls(), 0);
    }

    #[tokio::test]
    async fn foreign_account_selection_is_rejected_without_deploy() {
        let gateway = Arc::new(InMemoryGateway::new());
        gateway.set_accounts(vec![
            account("apn_mine", "u1", "gmail", true),
            account("apn_theirs", "u2", "gmail", true),
        ]);

        let err = service(&gateway)
            .deploy_trigger(
                "u1",
                TriggerType::GmailNewEmailReceived,
                &AccountSelector::Account("apn_theirs".to_string()),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TriggerError::AccountNotEligible(_)));
        assert_eq!(gateway.deploy_calls(), 0);
    }

    #[tokio::test]
    async fn deploy_uses_default_webhook_and_annotates_result() {
        let gateway = Arc::new(InMemoryGateway::new());
        gateway.set_accounts(vec![
            account("apn_a1", "u1", "gmail", true),
            account("apn_a2", "u1", "gmail", true),
        ]);

        let result = service(&gateway)
            .deploy_trigger(
                "u1",
                TriggerType::GmailNewEmailReceived,
                &AccountSelector::Account("apn_a2".to_string()),
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.account_id, "apn_a2");
        assert_eq!(result.account_name, "apn_a2@example.com");
        assert_eq!(
            result.webhook_url,
            "https://hub.example.com/webhooks/gmail_new_email"
        );
        assert_eq!(
            result.trigger.configured_props,
            json!({"gmail": {"authProvisionId": "apn_a2"}})
        );
        assert_eq!(gateway.deployed_for("u1").len(), 1);
    }

    #[tokio::test]
    async fn remote_deploy_failure_keeps_upstream_message() {
        let gateway = Arc::new(InMemoryGateway::new());
        gateway.set_accounts(vec![account("apn_a1", "u1", "gmail", true)]);
        gateway.fail_deploys_with(Some(ConnectorError::Rejected {
            status: 400,
            message: "Prop gmail is invalid".to_string(),
        }));

        let err = service(&gateway)
            .deploy_trigger(
                "u1",
                TriggerType::GmailNewEmailReceived,
                &AccountSelector::FirstEligible,
                Some("https://elsewhere.example.com/hook".to_string()),
            )
            .await
            .unwrap_err();
        match err {
            TriggerError::DeploymentFailed(message) => {
                assert_eq!(message, "Prop gmail is invalid")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_webhook_without_base_url_is_rejected() {
        let gateway = Arc::new(InMemoryGateway::new());
        gateway.set_accounts(vec![account("apn_a1", "u1", "gmail", true)]);
        let service = TriggerDeploymentService::new(gateway.clone(), None);

        let err = service
            .deploy_trigger(
                "u1",
                TriggerType::GmailNewEmailReceived,
                &AccountSelector::FirstEligible,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TriggerError::MissingWebhookUrl));
        assert_eq!(gateway.list_account_calls(), 0);
    }
}
