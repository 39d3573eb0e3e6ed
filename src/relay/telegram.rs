use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::util::escape_html;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Acknowledgment for a delivered hand-off notification.
#[derive(Debug, Clone)]
pub struct RelayReceipt {
    pub message_id: i64,
    pub sent_at: DateTime<Utc>,
}

/// A validated inbound update from the relay transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRelayMessage {
    pub update_id: i64,
    pub message_id: i64,
    pub chat_id: i64,
    pub text: String,
}

pub struct TelegramRelay {
    bot_token: Option<String>,
    channel_id: Option<String>,
    base_url: String,
    client: Client,
}

impl TelegramRelay {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            bot_token: config
                .bot_token
                .as_deref()
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .map(ToOwned::to_owned),
            channel_id: config
                .channel_id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(ToOwned::to_owned),
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            client: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.bot_token.is_some() && self.channel_id.is_some()
    }

    fn api_url(&self, api_method: &str) -> Result<String, RelayError> {
        let token = self.bot_token.as_deref().ok_or(RelayError::NotConfigured)?;
        Ok(format!("{}/bot{token}/{api_method}", self.base_url))
    }

    /// Post a hand-off notification to the operator chat.
    ///
    /// The session id is embedded as a `session:<id>` token so the operator
    /// (or `correlate`) can route the reply back; the message body is
    /// HTML-escaped before formatting since it is user-supplied.
    pub async fn notify(
        &self,
        session_id: &str,
        user_name: &str,
        message: &str,
    ) -> Result<RelayReceipt, RelayError> {
        let url = self.api_url("sendMessage")?;
        let chat_id = self.channel_id.as_deref().ok_or(RelayError::NotConfigured)?;

        let text = format!(
            "🔔 New message from: {}\nsession:{session_id}\n\n{}",
            escape_html(user_name),
            escape_html(message)
        );
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|error| RelayError::Transport(error.to_string()))?;

        let envelope: Value = response
            .json()
            .await
            .map_err(|error| RelayError::Transport(error.to_string()))?;

        if envelope.get("ok").and_then(Value::as_bool) != Some(true) {
            let description = envelope
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(RelayError::Api(description.to_string()));
        }

        let message_id = envelope
            .pointer("/result/message_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| RelayError::Api("sendMessage result missing message_id".into()))?;

        Ok(RelayReceipt {
            message_id,
            sent_at: Utc::now(),
        })
    }

    /// Validate a single webhook update.
    ///
    /// Updates without a text message (status changes, media) are not errors
    /// at the transport level; the caller acknowledges them and moves on.
    pub fn parse_update(update: &Value) -> Result<InboundRelayMessage, RelayError> {
        let update_id = update
            .get("update_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| RelayError::InvalidPayload("missing update_id".into()))?;
        let message = update
            .get("message")
            .ok_or_else(|| RelayError::InvalidPayload("missing message".into()))?;
        let message_id = message
            .get("message_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| RelayError::InvalidPayload("missing message_id".into()))?;
        let chat_id = message
            .pointer("/chat/id")
            .and_then(Value::as_i64)
            .ok_or_else(|| RelayError::InvalidPayload("missing chat id".into()))?;
        let text = message
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| RelayError::InvalidPayload("missing message text".into()))?;

        Ok(InboundRelayMessage {
            update_id,
            message_id,
            chat_id,
            text: text.to_string(),
        })
    }

    /// Fetch updates past `cursor` and return them with the advanced cursor.
    ///
    /// The caller must persist the new cursor before processing the batch
    /// (at-most-once on crash).
    pub async fn poll_updates(
        &self,
        cursor: i64,
    ) -> Result<(Vec<InboundRelayMessage>, i64), RelayError> {
        let url = self.api_url("getUpdates")?;
        let body = serde_json::json!({ "offset": cursor, "allowed_updates": ["message"] });

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|error| RelayError::Transport(error.to_string()))?;
        let envelope: Value = response
            .json()
            .await
            .map_err(|error| RelayError::Transport(error.to_string()))?;

        if envelope.get("ok").and_then(Value::as_bool) != Some(true) {
            let description = envelope
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(RelayError::Api(description.to_string()));
        }

        let mut messages = Vec::new();
        let mut next_cursor = cursor;
        if let Some(updates) = envelope.get("result").and_then(Value::as_array) {
            for update in updates {
                if let Some(update_id) = update.get("update_id").and_then(Value::as_i64) {
                    next_cursor = next_cursor.max(update_id + 1);
                }
                // Non-text updates advance the cursor but carry nothing.
                if let Ok(message) = Self::parse_update(update) {
                    messages.push(message);
                }
            }
        }

        Ok((messages, next_cursor))
    }
}

/// Find a `session:<id>` token echoed in an operator reply.
///
/// The outbound notification embeds the token, but nothing forces the
/// operator to quote it back; correlation by token is best-effort and the
/// caller falls back to the most recently notified session.
pub fn extract_session_token(text: &str) -> Option<String> {
    text.split_whitespace()
        .find_map(|word| word.strip_prefix("session:"))
        .filter(|id| !id.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn relay(base_url: &str, token: Option<&str>, chat: Option<&str>) -> TelegramRelay {
        TelegramRelay::new(&RelayConfig {
            bot_token: token.map(ToString::to_string),
            channel_id: chat.map(ToString::to_string),
            base_url: Some(base_url.to_string()),
            ..RelayConfig::default()
        })
    }

    #[tokio::test]
    async fn notify_posts_templated_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bottest-token/sendMessage"))
            .and(body_string_contains("session:sess-1"))
            .and(body_string_contains("New message from: Alice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true, "result": {"message_id": 42}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let relay = relay(&server.uri(), Some("test-token"), Some("777"));
        let receipt = relay.notify("sess-1", "Alice", "need help").await.unwrap();
        assert_eq!(receipt.message_id, 42);
    }

    #[tokio::test]
    async fn notify_escapes_user_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("&lt;script&gt;"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true, "result": {"message_id": 1}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let relay = relay(&server.uri(), Some("test-token"), Some("777"));
        relay
            .notify("sess-1", "Alice", "<script>alert(1)</script>")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn notify_without_credentials_fails_without_request() {
        let relay = relay("http://127.0.0.1:1", None, None);
        assert!(matches!(
            relay.notify("s", "u", "m").await,
            Err(RelayError::NotConfigured)
        ));
        assert!(!relay.is_configured());
    }

    #[tokio::test]
    async fn api_level_failure_surfaces_description() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": false, "description": "Unauthorized"
            })))
            .mount(&server)
            .await;

        let relay = relay(&server.uri(), Some("bad-token"), Some("777"));
        match relay.notify("s", "u", "m").await {
            Err(RelayError::Api(description)) => assert_eq!(description, "Unauthorized"),
            other => panic!("expected api error, got {other:?}"),
        }
    }

    #[test]
    fn parse_update_accepts_well_formed_payload() {
        let update = serde_json::json!({
            "update_id": 9,
            "message": {"message_id": 5, "chat": {"id": 777}, "text": "on it"}
        });
        let message = TelegramRelay::parse_update(&update).unwrap();
        assert_eq!(message.update_id, 9);
        assert_eq!(message.message_id, 5);
        assert_eq!(message.chat_id, 777);
        assert_eq!(message.text, "on it");
    }

    #[test]
    fn parse_update_rejects_missing_text() {
        let update = serde_json::json!({
            "update_id": 9,
            "message": {"message_id": 5, "chat": {"id": 777}, "photo": []}
        });
        assert!(matches!(
            TelegramRelay::parse_update(&update),
            Err(RelayError::InvalidPayload(_))
        ));
    }

    #[tokio::test]
    async fn poll_updates_advances_cursor_past_all_updates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bottest-token/getUpdates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "result": [
                    {"update_id": 10, "message": {"message_id": 1, "chat": {"id": 7}, "text": "a"}},
                    {"update_id": 11, "message": {"message_id": 2, "chat": {"id": 7}}},
                    {"update_id": 12, "message": {"message_id": 3, "chat": {"id": 7}, "text": "b"}}
                ]
            })))
            .mount(&server)
            .await;

        let relay = relay(&server.uri(), Some("test-token"), Some("7"));
        let (messages, cursor) = relay.poll_updates(10).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(cursor, 13);
    }

    #[test]
    fn session_token_extraction() {
        assert_eq!(
            extract_session_token("on it session:sess-42 give me a minute"),
            Some("sess-42".to_string())
        );
        assert_eq!(extract_session_token("on it"), None);
        assert_eq!(extract_session_token("session:"), None);
    }
}
