use chrono::{DateTime, SubsecRound, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One authorized link between an external user and a remote app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedAccount {
    pub id: String,
    pub external_user_id: String,
    pub app_slug: String,
    pub name: Option<String>,
    pub healthy: bool,
    /// `None` when the platform has not reported liveness.
    pub dead: Option<bool>,
    /// `None` when the platform omitted it. Kept at microsecond precision.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    pub app: AppMetadata,
    /// Only populated on remote reads that asked for credentials; never cached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppMetadata {
    pub name: Option<String>,
    pub auth_type: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

impl ConnectedAccount {
    /// Healthy and not reported dead.
    pub fn is_eligible(&self) -> bool {
        self.healthy && self.dead != Some(true)
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .or_else(|| self.app.name.clone())
            .unwrap_or_else(|| self.id.clone())
    }

    pub fn without_credentials(mut self) -> Self {
        self.credentials = None;
        self
    }
}

/// Every account store keeps microseconds; finer precision would not survive a round trip.
pub(crate) fn storage_precision(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(6)
}

/// Filter set accepted by the account listing endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AccountFilter {
    #[serde(default)]
    pub app: Option<String>,
    #[serde(default)]
    pub oauth_app_id: Option<String>,
    #[serde(default)]
    pub external_user_id: Option<String>,
    /// Accepts `true`/`false`, `1`/`0`, or an empty value (false).
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub include_credentials: bool,
}

impl AccountFilter {
    pub fn for_user(external_user_id: impl Into<String>) -> Self {
        Self {
            external_user_id: Some(external_user_id.into()),
            ..Self::default()
        }
    }

    pub fn with_app(mut self, app: impl Into<String>) -> Self {
        self.app = Some(app.into());
        self
    }

    /// Blank query values are treated as absent.
    pub fn normalized(self) -> Self {
        Self {
            app: non_blank(self.app),
            oauth_app_id: non_blank(self.oauth_app_id),
            external_user_id: non_blank(self.external_user_id),
            include_credentials: self.include_credentials,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFlag {
    Bool(bool),
    Text(String),
}

fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawFlag>::deserialize(deserializer)? {
        None => Ok(false),
        Some(RawFlag::Bool(value)) => Ok(value),
        Some(RawFlag::Text(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "" | "0" | "false" | "no" => Ok(false),
            "1" | "true" | "yes" => Ok(true),
            other => Err(de::Error::custom(format!(
                "include_credentials must be true/false or 1/0, got {:?}",
                other
            ))),
        },
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    Trigger,
    Action,
}

impl ComponentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ComponentType::Trigger => "trigger",
            ComponentType::Action => "action",
        }
    }

    pub(crate) fn path_segment(self) -> &'static str {
        match self {
            ComponentType::Trigger => "triggers",
            ComponentType::Action => "actions",
        }
    }
}

impl std::str::FromStr for ComponentType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trigger" | "triggers" => Ok(ComponentType::Trigger),
            "action" | "actions" => Ok(ComponentType::Action),
            other => Err(format!("unknown component type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentQuery {
    pub app: Option<String>,
    pub query: Option<String>,
    pub component_type: Option<ComponentType>,
}

/// A trigger or action published on the connector platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase", deserialize = "snake_case"))]
pub struct Component {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub component_type: Option<String>,
    #[serde(default)]
    pub configurable_props: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase", deserialize = "snake_case"))]
pub struct ConnectToken {
    pub token: String,
    pub expires_at: String,
    #[serde(default)]
    pub connect_link_url: Option<String>,
}

/// A trigger running on the connector platform on behalf of one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "DeployedTriggerBody")]
pub struct DeployedTrigger {
    pub id: String,
    /// Platform-internal id of the deployed component revision.
    #[serde(default)]
    pub component_id: Option<String>,
    /// Registry key such as `gmail-new-email-received`.
    #[serde(default)]
    pub component_key: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub configured_props: Value,
    #[serde(default)]
    pub active: Option<bool>,
    /// Remaining fields are passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Outbound shape: known fields in camelCase, platform extras nested under
/// `upstream` with their original keys.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeployedTriggerBody {
    id: String,
    component_id: Option<String>,
    component_key: Option<String>,
    owner_id: Option<String>,
    configured_props: Value,
    active: Option<bool>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    upstream: Map<String, Value>,
}

impl From<DeployedTrigger> for DeployedTriggerBody {
    fn from(trigger: DeployedTrigger) -> Self {
        Self {
            id: trigger.id,
            component_id: trigger.component_id,
            component_key: trigger.component_key,
            owner_id: trigger.owner_id,
            configured_props: trigger.configured_props,
            active: trigger.active,
            upstream: trigger.extra,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeployTriggerRequest {
    pub external_user_id: String,
    pub trigger_id: String,
    pub webhook_url: String,
    pub configured_props: Value,
}
