use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, warn};

use crate::account_sync::SyncError;
use crate::connector::ConnectorError;
use crate::identity::IdentityError;
use crate::triggers::TriggerError;
use crate::webhook::WebhookError;

/// Boundary error: every failure leaves as `{success:false, error, code}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", message)
    }

    fn internal(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("request failed ({}): {}", self.code, self.message);
        } else {
            warn!("request rejected ({}): {}", self.code, self.message);
        }
        (
            self.status,
            Json(json!({
                "success": false,
                "error": self.message,
                "code": self.code,
            })),
        )
            .into_response()
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthenticated", err.to_string())
    }
}

impl From<ConnectorError> for ApiError {
    fn from(err: ConnectorError) -> Self {
        Self::internal(err.code(), err.to_string())
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Remote(err) => err.into(),
            SyncError::MissingUser => Self::bad_request(err.to_string()),
            SyncError::Store(_) => Self::internal("store_error", err.to_string()),
            SyncError::Join(_) => Self::internal("internal_error", err.to_string()),
        }
    }
}

impl From<TriggerError> for ApiError {
    fn from(err: TriggerError) -> Self {
        let code = err.code();
        match err {
            TriggerError::Remote(err) => err.into(),
            TriggerError::DeploymentFailed(_) => Self::internal(code, err.to_string()),
            TriggerError::UnsupportedTriggerType(_)
            | TriggerError::NoAccountFound { .. }
            | TriggerError::AccountNotEligible(_)
            | TriggerError::MissingWebhookUrl
            | TriggerError::MissingUser => {
                Self::new(StatusCode::BAD_REQUEST, code, err.to_string())
            }
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::MalformedPayload(_) => Self::internal("malformed_payload", err.to_string()),
            WebhookError::UnknownHook(_) => {
                Self::new(StatusCode::NOT_FOUND, "unknown_webhook", err.to_string())
            }
            WebhookError::Sink(_) => Self::internal("sink_error", err.to_string()),
        }
    }
}
