//! OpenRouter chat-completions client.
//!
//! Speaks the OpenAI-compatible `/models` and `/chat/completions` endpoints.
//! Like the reader client, every call is a single attempt.

use std::time::Duration;

use nexus_shared::{NexusError, Result};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Default API root.
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Attribution headers OpenRouter shows on its dashboard.
const REFERER: &str = "https://nexus-navigation-architect.local";
const TITLE: &str = "Nexus Navigation Architect";

/// Large finalization prompts can take minutes to answer.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

const USER_AGENT: &str = concat!("NexusNavigationArchitect/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Protocol types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

/// Raw `/chat/completions` answer. Only the fields we read are modelled.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: Option<ResponseMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    pub content: Option<String>,
}

impl ChatResponse {
    /// `choices[0].message.content`, trimmed.
    pub fn text(&self) -> Result<String> {
        self.choices
            .first()
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.as_deref())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| NexusError::parse("invalid response structure: no choices[0].message.content"))
    }
}

/// One entry of the `/models` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelInfo>,
}

// ---------------------------------------------------------------------------
// OpenRouterClient
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| NexusError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", REFERER)
            .header("X-Title", TITLE)
    }

    /// List the models available to this key.
    #[instrument(skip(self))]
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| NexusError::Network(format!("{url}: {e}")))?;

        let list: ModelList = decode(response).await?;
        debug!(count = list.data.len(), "models listed");
        Ok(list.data)
    }

    /// Send a chat completion and return the raw response.
    #[instrument(skip(self, messages), fields(model = %model, messages = messages.len()))]
    pub async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model,
            messages,
            max_tokens,
            temperature,
        };

        let response = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| NexusError::Network(format!("{url}: {e}")))?;

        decode(response).await
    }

    /// Chat completion returning just the trimmed answer text.
    pub async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String> {
        self.chat_completion(model, messages, max_tokens, temperature)
            .await?
            .text()
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| NexusError::Network(format!("failed to read response body: {e}")))?;

    if !status.is_success() {
        return Err(NexusError::Api {
            status: status.as_u16(),
            message: body.trim().to_string(),
        });
    }

    serde_json::from_str(&body).map_err(|e| NexusError::parse(format!("unexpected response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> OpenRouterClient {
        OpenRouterClient::new("or-test", format!("{}/", server.uri())).unwrap()
    }

    #[tokio::test]
    async fn list_models_reads_data() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/models"))
            .and(header("Authorization", "Bearer or-test"))
            .and(header("X-Title", "Nexus Navigation Architect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"id": "openai/gpt-4o-mini", "name": "GPT-4o mini", "context_length": 128000},
                    {"id": "deepseek/deepseek-chat"}
                ]
            })))
            .mount(&server)
            .await;

        let models = client(&server).list_models().await.unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].name, "GPT-4o mini");
        assert_eq!(models[1].id, "deepseek/deepseek-chat");
        assert!(models[1].name.is_empty());
    }

    #[tokio::test]
    async fn complete_returns_trimmed_text() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("HTTP-Referer", "https://nexus-navigation-architect.local"))
            .and(body_partial_json(serde_json::json!({
                "model": "openai/gpt-4o-mini",
                "max_tokens": 4000,
                "messages": [{"role": "system", "content": "sys"}, {"role": "user", "content": "hi"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "  {\"a\": 1}\n"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = client(&server)
            .complete(
                "openai/gpt-4o-mini",
                &[ChatMessage::system("sys"), ChatMessage::user("hi")],
                4000,
                0.0,
            )
            .await
            .unwrap();
        assert_eq!(text, "{\"a\": 1}");
    }

    #[tokio::test]
    async fn empty_choices_is_parse_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
            .mount(&server)
            .await;

        let err = client(&server)
            .complete("m", &[ChatMessage::user("x")], 10, 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, NexusError::Parse { .. }));
    }

    #[tokio::test]
    async fn http_error_carries_status() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let err = client(&server)
            .complete("m", &[ChatMessage::user("x")], 10, 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, NexusError::Api { status: 429, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn list_models_rejects_unauthorized_key() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client(&server).list_models().await.unwrap_err();
        assert!(matches!(err, NexusError::Api { status: 401, .. }));
    }
}
