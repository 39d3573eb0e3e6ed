use crate::config::CompletionConfig;
use crate::error::CompletionError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct CompletionClient {
    /// Pre-computed `"Bearer <key>"` header value (avoids `format!` per request).
    cached_auth_header: Option<String>,
    /// Pre-computed chat completions URL.
    cached_chat_url: String,
    model: String,
    max_tokens: u32,
    persona: String,
    knowledge_base_path: PathBuf,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl CompletionClient {
    pub fn new(config: &CompletionConfig) -> Self {
        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        Self {
            cached_auth_header: config
                .api_key
                .as_deref()
                .filter(|key| !key.trim().is_empty())
                .map(|key| format!("Bearer {key}")),
            cached_chat_url: format!("{base_url}/chat/completions"),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            persona: config.persona.clone(),
            knowledge_base_path: PathBuf::from(&config.knowledge_base_path),
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.cached_auth_header.is_some()
    }

    /// Ask the model for a reply to a single user message.
    ///
    /// The knowledge base is re-read on every call so that edits made through
    /// the training-data editor take effect immediately.
    pub async fn get_reply(&self, user_message: &str) -> Result<String, CompletionError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system",
                    content: self.system_prompt().await,
                },
                Message {
                    role: "user",
                    content: user_message.to_string(),
                },
            ],
            max_tokens: self.max_tokens,
        };

        let response = self.call_api(&request).await?;
        let reply = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .map(str::trim)
            .unwrap_or_default();

        if reply.is_empty() {
            return Err(CompletionError::Malformed(
                "response contained no reply text".into(),
            ));
        }
        Ok(reply.to_string())
    }

    /// Minimal one-token probe used by `tidechat check` to validate the key.
    pub async fn verify_key(&self) -> Result<(), CompletionError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![Message {
                role: "user",
                content: "Test message".into(),
            }],
            max_tokens: 10,
        };
        self.call_api(&request).await.map(|_| ())
    }

    async fn system_prompt(&self) -> String {
        let knowledge = tokio::fs::read_to_string(&self.knowledge_base_path)
            .await
            .unwrap_or_default();
        format!("{}\n\n{knowledge}", self.persona)
    }

    async fn call_api(&self, request: &ChatRequest) -> Result<ChatResponse, CompletionError> {
        let auth_header = self
            .cached_auth_header
            .as_ref()
            .ok_or(CompletionError::MissingApiKey)?;

        let response = self
            .client
            .post(&self.cached_chat_url)
            .header("Authorization", auth_header)
            .json(request)
            .send()
            .await
            .map_err(|error| CompletionError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorEnvelope>()
                .await
                .ok()
                .and_then(|envelope| envelope.error)
                .map_or_else(|| "no error detail".to_string(), |body| body.message);
            return Err(CompletionError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|error| CompletionError::Malformed(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompletionConfig;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_config(base_url: &str, api_key: Option<&str>) -> CompletionConfig {
        CompletionConfig {
            api_key: api_key.map(ToString::to_string),
            base_url: Some(base_url.to_string()),
            ..CompletionConfig::default()
        }
    }

    #[tokio::test]
    async fn reply_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "  Hi there!  "}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = CompletionClient::new(&client_config(&server.uri(), Some("sk-test")));
        let reply = client.get_reply("hello").await.unwrap();
        assert_eq!(reply, "Hi there!");
    }

    #[tokio::test]
    async fn fails_without_key_and_makes_no_request() {
        let client = CompletionClient::new(&client_config("http://127.0.0.1:1", None));
        let result = client.get_reply("hello").await;
        assert!(matches!(result, Err(CompletionError::MissingApiKey)));
    }

    #[tokio::test]
    async fn blank_key_counts_as_missing() {
        let client = CompletionClient::new(&client_config("http://127.0.0.1:1", Some("   ")));
        assert!(!client.has_api_key());
    }

    #[tokio::test]
    async fn non_2xx_maps_to_api_error_with_upstream_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": {"message": "Incorrect API key provided"}
            })))
            .mount(&server)
            .await;

        let client = CompletionClient::new(&client_config(&server.uri(), Some("sk-bad")));
        match client.get_reply("hello").await {
            Err(CompletionError::Api { status, message }) => {
                assert_eq!(status, 401);
                assert!(message.contains("Incorrect API key"));
            }
            other => panic!("expected api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_choices_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let client = CompletionClient::new(&client_config(&server.uri(), Some("sk-test")));
        let result = client.get_reply("hello").await;
        assert!(matches!(result, Err(CompletionError::Malformed(_))));
    }

    #[tokio::test]
    async fn knowledge_base_lands_in_system_prompt() {
        let kb_file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(kb_file.path(), "Returns are accepted within 30 days.").unwrap();

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Returns are accepted within 30 days."))
            .and(body_string_contains("virtual support expert"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "ok"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = client_config(&server.uri(), Some("sk-test"));
        config.knowledge_base_path = kb_file.path().to_string_lossy().into_owned();
        let client = CompletionClient::new(&config);
        client.get_reply("what is your returns policy?").await.unwrap();
    }

    #[tokio::test]
    async fn missing_knowledge_base_degrades_to_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "ok"}}]
            })))
            .mount(&server)
            .await;

        let mut config = client_config(&server.uri(), Some("sk-test"));
        config.knowledge_base_path = "/nonexistent/kb.txt".into();
        let client = CompletionClient::new(&config);
        assert_eq!(client.get_reply("hello").await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn verify_key_maps_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "pong"}}]
            })))
            .mount(&server)
            .await;

        let client = CompletionClient::new(&client_config(&server.uri(), Some("sk-test")));
        assert!(client.verify_key().await.is_ok());

        let keyless = CompletionClient::new(&client_config(&server.uri(), None));
        assert!(matches!(
            keyless.verify_key().await,
            Err(CompletionError::MissingApiKey)
        ));
    }
}
