//! Scripted collaborators shared by the step and engine tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nexus_openrouter::ModelInfo;
use nexus_shared::{NexusError, Result};
use nexus_storage::ArtifactStore;

use crate::observer::WorkflowObserver;
use crate::services::{CompletionRequest, ContentReader, LanguageModel, SitemapSource};

pub(crate) fn temp_store() -> ArtifactStore {
    let dir = std::env::temp_dir().join(format!("nexus-core-test-{}", uuid::Uuid::now_v7()));
    ArtifactStore::new(dir)
}

// ---------------------------------------------------------------------------
// Sitemap
// ---------------------------------------------------------------------------

pub(crate) struct FakeSitemap {
    pub urls: Vec<String>,
}

#[async_trait]
impl SitemapSource for FakeSitemap {
    async fn collect(&self, _sitemap_url: &str, filter: Option<&str>) -> Result<Vec<String>> {
        Ok(self
            .urls
            .iter()
            .filter(|u| filter.is_none_or(|f| u.contains(f)))
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct FakeReader {
    /// URLs that always fail.
    pub failing: Vec<String>,
    pub delay: Duration,
    pub calls: Mutex<Vec<String>>,
}

impl FakeReader {
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ContentReader for FakeReader {
    async fn fetch(&self, url: &str) -> Result<String> {
        self.calls.lock().unwrap().push(url.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.iter().any(|f| f == url) {
            return Err(NexusError::Api {
                status: 500,
                message: format!("{url}: upstream error"),
            });
        }
        Ok(format!("# Product {url}\n\n**Price**: 10 PLN"))
    }
}

// ---------------------------------------------------------------------------
// Language model
// ---------------------------------------------------------------------------

type Responder = Box<dyn Fn(&CompletionRequest) -> Result<String> + Send + Sync>;

pub(crate) struct ScriptedModel {
    respond: Responder,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new(
        respond: impl Fn(&CompletionRequest) -> Result<String> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Answers every step with small, valid JSON.
    pub fn happy() -> Arc<Self> {
        Self::new(|request| {
            let user = &request.messages[1].content;
            if user.starts_with("The content of the product page is:") {
                Ok(r#"```json
{"product_name": "Shoe", "product_category": {"main_category": "Shoes", "subcategory": "Boots"}}
```"#
                    .to_string())
            } else if user.starts_with("Here is the product data:") {
                Ok(r#"{"main_navigation": [{"name": "Shoes", "subcategories": [{"name": "Boots"}]}]}"#
                    .to_string())
            } else {
                Ok(r#"Here you go: {"categories": [{"name": "Shoes", "subcategories": [{"name": "Boots"}]}]}"#
                    .to_string())
            }
        })
    }

    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(vec![ModelInfo {
            id: "openai/gpt-4o-mini".into(),
            name: "GPT-4o mini".into(),
        }])
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        self.calls.lock().unwrap().push(request.clone());
        (self.respond)(&request)
    }
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct RecordingObserver {
    pub lines: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().unwrap().iter().any(|l| l.contains(needle))
    }
}

impl WorkflowObserver for RecordingObserver {
    fn log(&self, message: &str) {
        self.lines.lock().unwrap().push(message.to_string());
    }

    fn progress(&self, _message: &str, _percent: Option<f64>) {}
}
