//! Typed boundary over the remote connector platform.
//!
//! The gateway is stateless: no data caching, no retries, no business rules.
//! Every failure is classified as unavailable, rejected or fault so callers
//! can decide their own retry policy.

mod auth;
pub mod memory;
pub mod models;
pub mod pipedream;

use async_trait::async_trait;
use serde_json::Value;

pub use memory::InMemoryGateway;
pub use models::{
    AccountFilter, AppMetadata, Component, ComponentQuery, ComponentType, ConnectToken,
    ConnectedAccount, DeployTriggerRequest, DeployedTrigger,
};
pub use pipedream::{PipedreamConfig, PipedreamGateway};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectorError {
    #[error("connector service unavailable: {0}")]
    Unavailable(String),
    #[error("connector service rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("connector service fault: {message}")]
    Fault { status: Option<u16>, message: String },
}

impl ConnectorError {
    /// Classify a non-success HTTP response, keeping the upstream message.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = upstream_message(body).unwrap_or_else(|| {
            if body.trim().is_empty() {
                format!("HTTP {}", status)
            } else {
                body.trim().to_string()
            }
        });
        if (400..500).contains(&status) {
            ConnectorError::Rejected { status, message }
        } else {
            ConnectorError::Fault {
                status: Some(status),
                message,
            }
        }
    }

    pub fn upstream_message(&self) -> &str {
        match self {
            ConnectorError::Unavailable(message) => message,
            ConnectorError::Rejected { message, .. } => message,
            ConnectorError::Fault { message, .. } => message,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ConnectorError::Unavailable(_) => "remote_unavailable",
            ConnectorError::Rejected { .. } => "remote_rejected",
            ConnectorError::Fault { .. } => "remote_fault",
        }
    }
}

fn upstream_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let error = value.get("error").or_else(|| value.get("message"))?;
    match error {
        Value::String(message) => Some(message.clone()),
        Value::Object(map) => map
            .get("message")
            .and_then(|message| message.as_str())
            .map(|message| message.to_string())
            .or_else(|| Some(error.to_string())),
        other => Some(other.to_string()),
    }
}

#[async_trait]
pub trait ConnectorGateway: Send + Sync {
    async fn list_accounts(
        &self,
        filter: &AccountFilter,
    ) -> Result<Vec<ConnectedAccount>, ConnectorError>;

    async fn get_components(
        &self,
        query: &ComponentQuery,
    ) -> Result<Vec<Component>, ConnectorError>;

    async fn get_component_definition(&self, key: &str) -> Result<Component, ConnectorError>;

    async fn create_connect_token(
        &self,
        external_user_id: &str,
    ) -> Result<ConnectToken, ConnectorError>;

    async fn list_triggers(
        &self,
        external_user_id: &str,
    ) -> Result<Vec<DeployedTrigger>, ConnectorError>;

    async fn deploy_trigger(
        &self,
        request: &DeployTriggerRequest,
    ) -> Result<DeployedTrigger, ConnectorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_status_classifies_client_and_server_errors() {
        let rejected = ConnectorError::from_status(422, r#"{"error":"configured_props invalid"}"#);
        assert_eq!(
            rejected,
            ConnectorError::Rejected {
                status: 422,
                message: "configured_props invalid".to_string()
            }
        );

        let fault = ConnectorError::from_status(503, "upstream down");
        assert_eq!(fault.code(), "remote_fault");
        assert_eq!(fault.upstream_message(), "upstream down");
    }

    #[test]
    fn from_status_reads_nested_error_messages() {
        let err = ConnectorError::from_status(
            400,
            r#"{"error":{"domain":"api","message":"app not found"}}"#,
        );
        assert_eq!(err.upstream_message(), "app not found");

        let empty = ConnectorError::from_status(500, "");
        assert_eq!(empty.upstream_message(), "HTTP 500");
    }
}
