//! Collaborator seams used by the workflow engine.
//!
//! Each remote dependency is an object-safe async trait so the engine can be
//! driven by the real HTTP clients in production and by scripted fakes in tests.

use std::sync::Arc;

use async_trait::async_trait;
use nexus_openrouter::{ChatMessage, ModelInfo, OpenRouterClient};
use nexus_reader::ReaderClient;
use nexus_shared::Result;
use nexus_sitemap::SitemapParser;
use tracing::info;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Turns a sitemap URL into a filtered list of page URLs.
#[async_trait]
pub trait SitemapSource: Send + Sync {
    async fn collect(&self, sitemap_url: &str, filter: Option<&str>) -> Result<Vec<String>>;
}

/// Fetches the rendered content of one page.
#[async_trait]
pub trait ContentReader: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// One chat completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    /// A system + user exchange at temperature 0.
    pub fn new(
        model: impl Into<String>,
        system: impl Into<String>,
        user: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            model: model.into(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            max_tokens,
            temperature: 0.0,
        }
    }
}

/// A chat-completion language model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    /// Returns the trimmed answer text.
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Concrete implementations
// ---------------------------------------------------------------------------

#[async_trait]
impl SitemapSource for SitemapParser {
    async fn collect(&self, sitemap_url: &str, filter: Option<&str>) -> Result<Vec<String>> {
        let log = |message: &str| info!(target: "nexus::sitemap", "{message}");
        SitemapParser::collect(self, sitemap_url, filter, &log).await
    }
}

#[async_trait]
impl ContentReader for ReaderClient {
    async fn fetch(&self, url: &str) -> Result<String> {
        ReaderClient::fetch(self, url).await
    }
}

#[async_trait]
impl LanguageModel for OpenRouterClient {
    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        OpenRouterClient::list_models(self).await
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        OpenRouterClient::complete(
            self,
            &request.model,
            &request.messages,
            request.max_tokens,
            request.temperature,
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// Services bundle
// ---------------------------------------------------------------------------

/// The collaborators handed to a [`crate::WorkflowEngine`].
///
/// `reader` and `llm` are optional because their API keys may be absent;
/// the engine refuses to start steps that need a missing one.
#[derive(Clone)]
pub struct Services {
    pub sitemap: Arc<dyn SitemapSource>,
    pub reader: Option<Arc<dyn ContentReader>>,
    pub llm: Option<Arc<dyn LanguageModel>>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("reader", &self.reader.is_some())
            .field("llm", &self.llm.is_some())
            .finish_non_exhaustive()
    }
}
