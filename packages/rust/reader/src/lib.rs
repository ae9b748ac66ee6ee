//! Client for the Jina Reader API, which renders a page and returns it as markdown.
//!
//! One call is one attempt. Retrying is the caller's job (the step-2 task pool).

use std::time::Duration;

use nexus_shared::{NexusError, Result};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, instrument};

/// Default Reader endpoint.
pub const DEFAULT_BASE_URL: &str = "https://r.jina.ai/";

/// Rendering with a headless browser can be slow.
const DEFAULT_TIMEOUT_SECS: u64 = 120;

const USER_AGENT: &str = concat!("NexusNavigationArchitect/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize)]
struct ReadRequest<'a> {
    url: &'a str,
}

// ---------------------------------------------------------------------------
// ReaderClient
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ReaderClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl ReaderClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| NexusError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into(),
        })
    }

    /// Fetch the markdown rendering of `url`.
    ///
    /// Returns the raw response body. Non-2xx statuses become [`NexusError::Api`]
    /// and transport failures [`NexusError::Network`].
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .header("X-Engine", "browser")
            .header("X-Retain-Images", "none")
            .header("X-Return-Format", "markdown")
            .json(&ReadRequest { url })
            .send()
            .await
            .map_err(|e| NexusError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NexusError::Api {
                status: status.as_u16(),
                message: format!("reader failed for {url}: {}", body.trim()),
            });
        }

        let content = response
            .text()
            .await
            .map_err(|e| NexusError::Network(format!("{url}: failed to read body: {e}")))?;

        debug!(bytes = content.len(), "page fetched");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetch_sends_reader_headers() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("Authorization", "Bearer jina-test"))
            .and(header("X-Engine", "browser"))
            .and(header("X-Retain-Images", "none"))
            .and(header("X-Return-Format", "markdown"))
            .and(body_json(serde_json::json!({"url": "https://shop.example.com/a.html"})))
            .respond_with(ResponseTemplate::new(200).set_body_string("# Red Shoe\n\nPrice: 10"))
            .expect(1)
            .mount(&server)
            .await;

        let client = ReaderClient::new("jina-test", format!("{}/", server.uri())).unwrap();
        let content = client.fetch("https://shop.example.com/a.html").await.unwrap();
        assert_eq!(content, "# Red Shoe\n\nPrice: 10");
    }

    #[tokio::test]
    async fn fetch_maps_http_errors() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let client = ReaderClient::new("k", format!("{}/", server.uri())).unwrap();
        let err = client.fetch("https://shop.example.com/a.html").await.unwrap_err();
        match err {
            NexusError::Api { status, message } => {
                assert_eq!(status, 503);
                assert!(message.contains("busy"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn fetch_unreachable_is_network_error() {
        // Port 9 (discard) on localhost is not listening in test environments.
        let client = ReaderClient::new("k", "http://127.0.0.1:9/").unwrap();
        let err = client.fetch("https://shop.example.com/a.html").await.unwrap_err();
        assert!(matches!(err, NexusError::Network(_)));
        assert!(err.is_transient());
    }
}
