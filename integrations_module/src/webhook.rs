//! Receives trigger callbacks posted by the connector platform.
//!
//! Delivery is at-least-once and unordered, so events carry a content hash
//! that downstream consumers can dedupe on. Any JSON object is accepted.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub provider: String,
    pub event: String,
    pub payload: Map<String, Value>,
    pub received_at: DateTime<Utc>,
    pub dedupe_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookAck {
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),
    #[error("unknown webhook route: {0}")]
    UnknownHook(String),
    #[error("webhook sink failed: {0}")]
    Sink(String),
}

/// Downstream consumer of accepted webhook events.
#[async_trait]
pub trait WebhookSink: Send + Sync {
    async fn deliver(&self, event: WebhookEvent) -> Result<(), WebhookError>;
}

/// Default sink: records the event in the service log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingWebhookSink;

#[async_trait]
impl WebhookSink for LoggingWebhookSink {
    async fn deliver(&self, event: WebhookEvent) -> Result<(), WebhookError> {
        let keys: Vec<&str> = event.payload.keys().map(String::as_str).collect();
        info!(
            "webhook {}_{} received dedupe_key={} keys={:?}",
            event.provider, event.event, event.dedupe_key, keys
        );
        Ok(())
    }
}

pub struct WebhookReceiver {
    sink: Arc<dyn WebhookSink>,
}

impl WebhookReceiver {
    pub fn new(sink: Arc<dyn WebhookSink>) -> Self {
        Self { sink }
    }

    /// Accept the raw body posted to `/webhooks/<hook>`.
    pub async fn receive(&self, hook: &str, body: &[u8]) -> Result<WebhookAck, WebhookError> {
        let (provider, event) = split_hook(hook)?;
        let payload = parse_payload(body)?;
        let received_at = Utc::now();
        let event = WebhookEvent {
            provider: provider.to_string(),
            event: event.to_string(),
            payload,
            received_at,
            dedupe_key: format!("{:x}", md5::compute(body)),
        };
        let label = format!("{}_{}", event.provider, event.event);

        if let Err(err) = self.sink.deliver(event).await {
            // Still acked: the platform redelivers anything non-2xx.
            warn!("webhook {} accepted but sink failed: {}", label, err);
        }

        Ok(WebhookAck {
            message: format!("{} webhook received", label),
            timestamp: received_at.to_rfc3339(),
        })
    }
}

/// Split `gmail_new_email` into (`gmail`, `new_email`).
pub fn split_hook(hook: &str) -> Result<(&str, &str), WebhookError> {
    match hook.split_once('_') {
        Some((provider, event))
            if is_route_segment(provider) && is_route_segment(event) =>
        {
            Ok((provider, event))
        }
        _ => Err(WebhookError::UnknownHook(hook.to_string())),
    }
}

fn is_route_segment(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn parse_payload(body: &[u8]) -> Result<Map<String, Value>, WebhookError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|err| WebhookError::MalformedPayload(err.to_string()))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(WebhookError::MalformedPayload(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collecting {
        events: Mutex<Vec<WebhookEvent>>,
        fail: bool,
    }

    #[async_trait]
    impl WebhookSink for Collecting {
        async fn deliver(&self, event: WebhookEvent) -> Result<(), WebhookError> {
            self.events.lock().unwrap().push(event);
            if self.fail {
                return Err(WebhookError::Sink("queue full".to_string()));
            }
            Ok(())
        }
    }

    #[test]
    fn split_hook_takes_first_underscore() {
        assert_eq!(
            split_hook("gmail_new_email").unwrap(),
            ("gmail", "new_email")
        );
        assert!(matches!(
            split_hook("gmail"),
            Err(WebhookError::UnknownHook(_))
        ));
        assert!(matches!(
            split_hook("_new_email"),
            Err(WebhookError::UnknownHook(_))
        ));
    }

    #[tokio::test]
    async fn accepts_any_object_and_hands_it_downstream() {
        let sink = Arc::new(Collecting::default());
        let receiver = WebhookReceiver::new(sink.clone());
        let body = br#"{"id":"msg-1","subject":"hello","nested":{"x":1}}"#;

        let ack = receiver.receive("gmail_new_email", body).await.unwrap();
        assert_eq!(ack.message, "gmail_new_email webhook received");
        assert!(DateTime::parse_from_rfc3339(&ack.timestamp).is_ok());

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].provider, "gmail");
        assert_eq!(events[0].event, "new_email");
        assert_eq!(events[0].payload["subject"], "hello");
    }

    #[tokio::test]
    async fn redelivery_keeps_the_same_dedupe_key() {
        let sink = Arc::new(Collecting::default());
        let receiver = WebhookReceiver::new(sink.clone());
        let body = br#"{"id":"msg-1"}"#;

        receiver.receive("gmail_new_email", body).await.unwrap();
        receiver.receive("gmail_new_email", body).await.unwrap();

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].dedupe_key, events[1].dedupe_key);
    }

    #[tokio::test]
    async fn malformed_payloads_are_rejected() {
        let sink = Arc::new(Collecting::default());
        let receiver = WebhookReceiver::new(sink.clone());

        for body in [&b"not json"[..], &b"[1,2]"[..], &b""[..], &b"\"text\""[..]] {
            let err = receiver.receive("gmail_new_email", body).await.unwrap_err();
            assert!(matches!(err, WebhookError::MalformedPayload(_)));
        }
        assert!(sink.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sink_failure_still_acknowledges() {
        let sink = Arc::new(Collecting {
            fail: true,
            ..Collecting::default()
        });
        let receiver = WebhookReceiver::new(sink.clone());

        let ack = receiver
            .receive("notion_new_page", br#"{"page":"p1"}"#)
            .await
            .unwrap();
        assert_eq!(ack.message, "notion_new_page webhook received");
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }
}
