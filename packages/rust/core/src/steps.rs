//! The five step bodies.
//!
//! Each step reads its predecessor's artifact, does its work (steps 2-4 fan
//! out through a [`TaskPool`]) and writes its own artifact. A step cancelled
//! mid-way writes nothing.

use std::sync::Arc;

use nexus_shared::{
    CONTENT_FILE, CategoryStructure, ContentRecord, EXTRACTION_FILE, ExtractionRecord, FINAL_FILE,
    NexusError, PRODUCTS_FILE, Result, STRUCTURE_FILE, StepId, WorkflowSettings,
};
use nexus_storage::ArtifactStore;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::control::{StepInputs, StepModels};
use crate::merge::{PartialCategoryTree, merge};
use crate::observer::WorkflowObserver;
use crate::pool::TaskPool;
use crate::prompts::PromptSet;
use crate::services::{CompletionRequest, LanguageModel, Services};
use crate::text::{
    clean_content, extract_json_object, format_outline, parse_json_object, strip_code_fences,
};

const DEFAULT_MAX_TOKENS: u32 = 4000;
const FINALIZATION_MAX_TOKENS: u32 = 16000;

/// How a step body ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepOutcome {
    /// The step's artifact was written.
    Written,
    /// The step ran to the end without producing an artifact.
    NotWritten,
    /// The run was stopped while the step was in progress.
    Cancelled,
}

/// Everything a step body needs, borrowed from the engine.
pub(crate) struct StepContext<'a> {
    pub store: &'a ArtifactStore,
    pub settings: &'a WorkflowSettings,
    pub prompts: &'a PromptSet,
    pub services: &'a Services,
    pub models: &'a StepModels,
    pub inputs: &'a StepInputs,
    pub observer: &'a Arc<dyn WorkflowObserver>,
    pub cancel: &'a CancellationToken,
}

impl StepContext<'_> {
    pub fn log(&self, message: &str) {
        debug!("{message}");
        self.observer.log(message);
    }

    fn llm(&self) -> Result<Arc<dyn LanguageModel>> {
        self.services.llm.clone().ok_or_else(|| {
            NexusError::validation("no language model configured (OpenRouter API key missing)")
        })
    }

    fn model(&self, step: StepId) -> Result<String> {
        self.models
            .for_step(step)
            .map(String::from)
            .ok_or_else(|| NexusError::validation(format!("no model selected for {step}")))
    }

    /// Progress callback for a pool: logs every tenth item and the last one.
    fn pool_progress(&self, label: &'static str) -> impl FnMut(usize, usize) + '_ {
        move |done, total| {
            let percent = if total == 0 {
                100.0
            } else {
                done as f64 / total as f64 * 100.0
            };
            self.observer
                .progress(&format!("{label}: {done}/{total}"), Some(percent));
            if done % 10 == 0 || done == total {
                self.log(&format!("Processed {done}/{total}"));
            }
        }
    }

    /// Copy the current artifact into `backups/` before it is replaced.
    fn backup(&self, name: &str) -> Result<()> {
        if let Some(path) = self.store.backup(name)? {
            self.log(&format!("Backup: {}", path.display()));
        }
        Ok(())
    }
}

/// Read a predecessor artifact; absence or a schema mismatch is `MissingInput`.
fn read_input<T: DeserializeOwned>(store: &ArtifactStore, name: &str) -> Result<T> {
    store.read_json(name).map_err(|e| input_error(name, e))
}

fn input_error(name: &str, error: NexusError) -> NexusError {
    match error {
        NexusError::NotFound { .. } => NexusError::missing_input(name, "file not found"),
        NexusError::Parse { message } => NexusError::missing_input(name, message),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Step 1: product URLs
// ---------------------------------------------------------------------------

#[instrument(skip_all, fields(step = 1))]
pub(crate) async fn collect_products(ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let urls = if let Some(file) = &ctx.inputs.urls_file {
        ctx.log(&format!("Loading URLs from {}", file.display()));
        nexus_sitemap::load_url_file(file)?
    } else if let Some(sitemap) = ctx
        .inputs
        .sitemap_url
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        let filter = ctx
            .inputs
            .url_filter
            .as_deref()
            .unwrap_or(&ctx.settings.url_filter);
        let filter = Some(filter).filter(|f| !f.is_empty());
        ctx.log(&format!("Parsing sitemap {sitemap}"));
        ctx.services.sitemap.collect(sitemap, filter).await?
    } else {
        return Err(NexusError::validation(
            "step 1 needs a sitemap URL or a URL list file",
        ));
    };

    if ctx.cancel.is_cancelled() {
        return Ok(StepOutcome::Cancelled);
    }

    ctx.store.write_lines(PRODUCTS_FILE, &urls)?;
    ctx.log(&format!("Found {} product URLs, saved to {PRODUCTS_FILE}", urls.len()));
    Ok(StepOutcome::Written)
}

// ---------------------------------------------------------------------------
// Step 2: page content
// ---------------------------------------------------------------------------

#[instrument(skip_all, fields(step = 2))]
pub(crate) async fn fetch_content(ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let urls = ctx
        .store
        .read_lines(PRODUCTS_FILE)
        .map_err(|e| input_error(PRODUCTS_FILE, e))?;
    let reader = ctx.services.reader.clone().ok_or_else(|| {
        NexusError::validation("no content reader configured (Jina API key missing)")
    })?;

    let pool = TaskPool::new(ctx.settings.reader_threads, ctx.settings.reader_retries);
    ctx.log(&format!(
        "Fetching {} pages ({} workers, {} retries)",
        urls.len(),
        pool.workers(),
        pool.max_retries()
    ));

    let on_attempt_error = Arc::clone(ctx.observer);
    let on_degrade = Arc::clone(ctx.observer);

    let records = pool
        .run(
            urls,
            ctx.cancel,
            ctx.pool_progress("Fetching content"),
            move |url: String| {
                let reader = Arc::clone(&reader);
                let observer = Arc::clone(&on_attempt_error);
                async move {
                    match reader.fetch(&url).await {
                        Ok(content) => Ok(ContentRecord {
                            url,
                            content,
                            error: None,
                        }),
                        Err(e) => {
                            warn!(url = %url, error = %e, "fetch attempt failed");
                            observer.log(&format!("Error fetching {url}: {e}"));
                            Err(e)
                        }
                    }
                }
            },
            move |url, error| {
                on_degrade.log(&format!("Giving up on {url}"));
                ContentRecord {
                    url: url.clone(),
                    content: String::new(),
                    error: Some(error.to_string()),
                }
            },
        )
        .await?;

    if ctx.cancel.is_cancelled() {
        return Ok(StepOutcome::Cancelled);
    }

    let failed = records.iter().filter(|r| r.error.is_some()).count();
    ctx.store.write_json(CONTENT_FILE, &records)?;
    ctx.log(&format!(
        "Fetched content for {} URLs ({failed} failed), saved to {CONTENT_FILE}",
        records.len()
    ));
    Ok(StepOutcome::Written)
}

// ---------------------------------------------------------------------------
// Step 3: attribute extraction
// ---------------------------------------------------------------------------

#[instrument(skip_all, fields(step = 3))]
pub(crate) async fn extract_attributes(ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let records: Vec<ContentRecord> = read_input(ctx.store, CONTENT_FILE)?;
    let llm = ctx.llm()?;
    let model: Arc<str> = ctx.model(StepId::Step3)?.into();
    let system: Arc<str> = ctx.prompts.extraction.as_str().into();
    ctx.log(&format!("Model: {model}"));

    let pool = TaskPool::new(ctx.settings.extract_threads, ctx.settings.extract_retries);
    let on_attempt_error = Arc::clone(ctx.observer);
    let on_degrade = Arc::clone(ctx.observer);

    let extractions = pool
        .run(
            records,
            ctx.cancel,
            ctx.pool_progress("Extraction"),
            move |record: ContentRecord| {
                let llm = Arc::clone(&llm);
                let (model, system) = (Arc::clone(&model), Arc::clone(&system));
                let observer = Arc::clone(&on_attempt_error);
                async move {
                    let cleaned = clean_content(&record.content);
                    let request = CompletionRequest::new(
                        &*model,
                        &*system,
                        format!("The content of the product page is:\n{cleaned}"),
                        DEFAULT_MAX_TOKENS,
                    );

                    let result: Result<_> = async {
                        let raw = llm.complete(request).await?;
                        parse_json_object(&strip_code_fences(&raw)).map_err(|e| {
                            NexusError::parse(format!("extraction is not a JSON object: {e}"))
                        })
                    }
                    .await;

                    match result {
                        Ok(extraction) => Ok(ExtractionRecord {
                            url: record.url,
                            extraction,
                        }),
                        Err(e) => {
                            warn!(url = %record.url, error = %e, "extraction attempt failed");
                            observer.log(&format!("Extraction attempt failed for {}: {e}", record.url));
                            Err(e)
                        }
                    }
                }
            },
            move |record, _error| {
                on_degrade.log(&format!("Extraction failed: {}", record.url));
                ExtractionRecord {
                    url: record.url.clone(),
                    extraction: serde_json::Map::new(),
                }
            },
        )
        .await?;

    if ctx.cancel.is_cancelled() {
        return Ok(StepOutcome::Cancelled);
    }

    ctx.backup(EXTRACTION_FILE)?;
    ctx.store.write_json(EXTRACTION_FILE, &extractions)?;
    ctx.log(&format!(
        "Saved extraction for {} products to {EXTRACTION_FILE}",
        extractions.len()
    ));
    Ok(StepOutcome::Written)
}

// ---------------------------------------------------------------------------
// Step 4: category structure
// ---------------------------------------------------------------------------

#[instrument(skip_all, fields(step = 4))]
pub(crate) async fn build_structure(ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let records: Vec<ExtractionRecord> = read_input(ctx.store, EXTRACTION_FILE)?;
    let llm = ctx.llm()?;
    let model: Arc<str> = ctx.model(StepId::Step4)?.into();
    let system: Arc<str> = ctx.prompts.structure.as_str().into();
    ctx.log(&format!("Model: {model}"));

    let batch_size = ctx.settings.batch_size.max(1);
    let batches: Vec<Vec<ExtractionRecord>> =
        records.chunks(batch_size).map(<[_]>::to_vec).collect();
    ctx.log(&format!(
        "{} products in {} batches of up to {batch_size}",
        records.len(),
        batches.len()
    ));

    let pool = TaskPool::new(ctx.settings.batch_threads, ctx.settings.batch_retries);
    let on_attempt_error = Arc::clone(ctx.observer);
    let on_degrade = Arc::clone(ctx.observer);

    let partials = pool
        .run(
            batches,
            ctx.cancel,
            ctx.pool_progress("Building structure"),
            move |batch: Vec<ExtractionRecord>| {
                let llm = Arc::clone(&llm);
                let (model, system) = (Arc::clone(&model), Arc::clone(&system));
                let observer = Arc::clone(&on_attempt_error);
                async move {
                    let categorized: Vec<_> = batch
                        .iter()
                        .filter(|r| r.main_category().is_some())
                        .map(|r| &r.extraction)
                        .collect();
                    if categorized.is_empty() {
                        return Ok(PartialCategoryTree::default());
                    }

                    let data = serde_json::to_string(&categorized)
                        .map_err(|e| NexusError::parse(e.to_string()))?;
                    let request = CompletionRequest::new(
                        &*model,
                        &*system,
                        format!("Here is the product data:\n{data}"),
                        DEFAULT_MAX_TOKENS,
                    );

                    let result: Result<_> = async {
                        let raw = llm.complete(request).await?;
                        serde_json::from_str::<CategoryStructure>(&strip_code_fences(&raw))
                            .map_err(|e| NexusError::parse(format!("navigation is not valid: {e}")))
                    }
                    .await;

                    match result {
                        Ok(structure) => Ok(PartialCategoryTree::from(structure)),
                        Err(e) => {
                            warn!(error = %e, "batch attempt failed");
                            observer.log(&format!("Batch attempt failed: {e}"));
                            Err(e)
                        }
                    }
                }
            },
            move |_batch, error| {
                on_degrade.log(&format!("Batch failed: {error}"));
                PartialCategoryTree::default()
            },
        )
        .await?;

    if ctx.cancel.is_cancelled() {
        return Ok(StepOutcome::Cancelled);
    }

    let structure = merge(partials);
    ctx.backup(STRUCTURE_FILE)?;
    ctx.store.write_json(STRUCTURE_FILE, &structure)?;
    ctx.log(&format!(
        "Saved {} main categories to {STRUCTURE_FILE}",
        structure.main_navigation.len()
    ));
    Ok(StepOutcome::Written)
}

// ---------------------------------------------------------------------------
// Step 5: finalization
// ---------------------------------------------------------------------------

#[instrument(skip_all, fields(step = 5))]
pub(crate) async fn finalize_categories(ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let structure: CategoryStructure = read_input(ctx.store, STRUCTURE_FILE)?;
    let llm = ctx.llm()?;
    let model = ctx.model(StepId::Step5)?;
    ctx.log(&format!("Model: {model}"));

    let data = serde_json::to_string(&structure).map_err(|e| NexusError::parse(e.to_string()))?;
    let mut user = format!("Here is the input list:\n{data}");
    let attempts = ctx.settings.final_retries + 1;

    for attempt in 1..=attempts {
        if ctx.cancel.is_cancelled() {
            return Ok(StepOutcome::Cancelled);
        }
        ctx.log(&format!("Optimizing (attempt {attempt})..."));

        let request = CompletionRequest::new(
            model.as_str(),
            ctx.prompts.finalization.as_str(),
            user.clone(),
            FINALIZATION_MAX_TOKENS,
        );
        let response = tokio::select! {
            _ = ctx.cancel.cancelled() => return Ok(StepOutcome::Cancelled),
            response = llm.complete(request) => response,
        };

        let raw = match response {
            Ok(raw) => raw,
            Err(e) => {
                warn!(attempt, error = %e, "finalization call failed");
                ctx.log(&format!("Finalization error (attempt {attempt}): {e}"));
                continue;
            }
        };
        ctx.log(&format!("Received response ({} chars)", raw.chars().count()));

        let cleaned = strip_code_fences(&raw);
        match parse_json_object(extract_json_object(&cleaned)) {
            Ok(tree) => {
                ctx.backup(FINAL_FILE)?;
                ctx.store.write_json(FINAL_FILE, &tree)?;
                ctx.log(&format!("Saved final category structure to {FINAL_FILE}"));

                let categories = tree
                    .get("categories")
                    .and_then(serde_json::Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                ctx.log("=== Final category structure ===");
                for line in format_outline(categories) {
                    ctx.log(&line);
                }
                return Ok(StepOutcome::Written);
            }
            Err(e) => {
                warn!(attempt, error = %e, "finalization output is not valid JSON");
                ctx.log(&format!("Invalid JSON in finalization (attempt {attempt}): {e}"));
                user = format!("Output ONLY valid JSON. No text.\n\n{data}");
            }
        }
    }

    warn!(attempts, "finalization failed; no artifact written");
    ctx.log(&format!("Finalization failed after {attempts} attempts"));
    Ok(StepOutcome::NotWritten)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeReader, FakeSitemap, RecordingObserver, ScriptedModel, temp_store};
    use nexus_shared::MainCategory;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        store: ArtifactStore,
        settings: WorkflowSettings,
        prompts: PromptSet,
        services: Services,
        models: StepModels,
        inputs: StepInputs,
        observer: Arc<dyn WorkflowObserver>,
        recorder: Arc<RecordingObserver>,
        cancel: CancellationToken,
    }

    impl Harness {
        fn new(reader: Arc<FakeReader>, llm: Arc<ScriptedModel>) -> Self {
            let recorder = Arc::new(RecordingObserver::default());
            Self {
                store: temp_store(),
                settings: WorkflowSettings::default(),
                prompts: PromptSet::default(),
                services: Services {
                    sitemap: Arc::new(FakeSitemap {
                        urls: vec![
                            "https://shop.example.com/a.html".into(),
                            "https://shop.example.com/b.php".into(),
                        ],
                    }),
                    reader: Some(reader),
                    llm: Some(llm),
                },
                models: StepModels {
                    step3: Some("fast".into()),
                    step4: Some("fast".into()),
                    step5: Some("smart".into()),
                },
                inputs: StepInputs {
                    sitemap_url: Some("https://shop.example.com/sitemap.xml".into()),
                    ..StepInputs::default()
                },
                observer: recorder.clone(),
                recorder,
                cancel: CancellationToken::new(),
            }
        }

        fn ctx(&self) -> StepContext<'_> {
            StepContext {
                store: &self.store,
                settings: &self.settings,
                prompts: &self.prompts,
                services: &self.services,
                models: &self.models,
                inputs: &self.inputs,
                observer: &self.observer,
                cancel: &self.cancel,
            }
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(self.store.root());
        }
    }

    fn extraction(url: &str, main: Option<&str>) -> ExtractionRecord {
        let value = serde_json::json!({"product_category": {"main_category": main}});
        ExtractionRecord {
            url: url.into(),
            extraction: value.as_object().cloned().unwrap_or_default(),
        }
    }

    #[tokio::test]
    async fn step1_filters_sitemap_with_default_filter() {
        let h = Harness::new(Arc::default(), ScriptedModel::happy());
        assert_eq!(collect_products(&h.ctx()).await.unwrap(), StepOutcome::Written);
        assert_eq!(
            h.store.read_lines(PRODUCTS_FILE).unwrap(),
            vec!["https://shop.example.com/a.html"]
        );
    }

    #[tokio::test]
    async fn step1_prefers_url_file() {
        let mut h = Harness::new(Arc::default(), ScriptedModel::happy());
        let file = h.store.root().join("input-urls.txt");
        std::fs::create_dir_all(h.store.root()).unwrap();
        std::fs::write(&file, "https://x/1.php\n\nhttps://x/2.php\n").unwrap();
        h.inputs.urls_file = Some(file);

        collect_products(&h.ctx()).await.unwrap();
        assert_eq!(
            h.store.read_lines(PRODUCTS_FILE).unwrap(),
            vec!["https://x/1.php", "https://x/2.php"]
        );
    }

    #[tokio::test]
    async fn step2_degrades_failed_urls() {
        let reader = Arc::new(FakeReader {
            failing: vec!["https://x/bad.html".into()],
            ..FakeReader::default()
        });
        let mut h = Harness::new(Arc::clone(&reader), ScriptedModel::happy());
        h.settings.reader_retries = 1;
        h.store
            .write_lines(
                PRODUCTS_FILE,
                &["https://x/ok.html".to_string(), "https://x/bad.html".to_string()],
            )
            .unwrap();

        fetch_content(&h.ctx()).await.unwrap();

        let mut records: Vec<ContentRecord> = h.store.read_json(CONTENT_FILE).unwrap();
        records.sort_by(|a, b| a.url.cmp(&b.url));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].url, "https://x/bad.html");
        assert!(records[0].content.is_empty());
        assert!(records[0].error.as_deref().unwrap().contains("HTTP 500"));
        assert!(records[1].error.is_none());
        assert!(records[1].content.contains("Product"));
        // one attempt for the good URL, two for the bad one
        assert_eq!(reader.call_count(), 3);
        assert!(h.recorder.contains("Giving up on https://x/bad.html"));
    }

    #[tokio::test]
    async fn step2_without_products_is_missing_input() {
        let h = Harness::new(Arc::default(), ScriptedModel::happy());
        let err = fetch_content(&h.ctx()).await.unwrap_err();
        assert!(matches!(err, NexusError::MissingInput { .. }));
    }

    #[tokio::test]
    async fn step3_invalid_json_degrades_after_three_attempts() {
        let llm = ScriptedModel::new(|_| Ok("I think this product is a shoe.".into()));
        let mut h = Harness::new(Arc::default(), Arc::clone(&llm));
        h.settings.extract_retries = 2;
        h.store
            .write_json(
                CONTENT_FILE,
                &[ContentRecord {
                    url: "https://x/a.html".into(),
                    content: "# Shoe\n\n**Red** [link](https://x/y)".into(),
                    error: None,
                }],
            )
            .unwrap();

        extract_attributes(&h.ctx()).await.unwrap();

        let records: Vec<ExtractionRecord> = h.store.read_json(EXTRACTION_FILE).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].extraction.is_empty());
        assert_eq!(llm.call_count(), 3);

        let call = &llm.calls()[0];
        assert_eq!(call.max_tokens, 4000);
        assert_eq!(call.temperature, 0.0);
        assert_eq!(call.messages[0].role, "system");
        assert_eq!(
            call.messages[1].content,
            "The content of the product page is:\nShoe\nRed link"
        );
    }

    #[tokio::test]
    async fn step3_parses_fenced_json_and_backs_up() {
        let h = Harness::new(Arc::default(), ScriptedModel::happy());
        h.store
            .write_json(
                CONTENT_FILE,
                &[ContentRecord {
                    url: "https://x/a.html".into(),
                    content: "Shoe".into(),
                    error: None,
                }],
            )
            .unwrap();
        h.store.write(EXTRACTION_FILE, b"[]").unwrap();

        extract_attributes(&h.ctx()).await.unwrap();

        let records: Vec<ExtractionRecord> = h.store.read_json(EXTRACTION_FILE).unwrap();
        assert_eq!(records[0].main_category(), Some(&serde_json::json!("Shoes")));
        let backups = std::fs::read_dir(h.store.root().join("backups")).unwrap().count();
        assert_eq!(backups, 1);
    }

    #[tokio::test]
    async fn step4_merges_two_partials() {
        let call = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&call);
        let llm = ScriptedModel::new(move |_| {
            // Batches finish in any order; each answer is a different partial tree.
            Ok(if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                r#"{"main_navigation":[{"name":"Electronics","subcategories":[{"name":"Phones"},{"name":"Laptops"}]}]}"#
            } else {
                "```json\n{\"main_navigation\":[{\"name\":\"Electronics\",\"subcategories\":[{\"name\":\"Laptops\"}]}]}\n```"
            }
            .to_string())
        });
        let mut h = Harness::new(Arc::default(), Arc::clone(&llm));
        h.settings.batch_size = 1;
        h.store
            .write_json(
                EXTRACTION_FILE,
                &[
                    extraction("https://x/1", Some("Electronics")),
                    extraction("https://x/2", Some("Electronics")),
                ],
            )
            .unwrap();

        build_structure(&h.ctx()).await.unwrap();

        let structure: CategoryStructure = h.store.read_json(STRUCTURE_FILE).unwrap();
        assert_eq!(
            structure.main_navigation,
            vec![MainCategory {
                name: "Electronics".into(),
                subcategories: vec![
                    nexus_shared::Subcategory { name: "Laptops".into() },
                    nexus_shared::Subcategory { name: "Phones".into() },
                ],
            }]
        );
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn step4_skips_uncategorized_batches() {
        let llm = ScriptedModel::happy();
        let mut h = Harness::new(Arc::default(), Arc::clone(&llm));
        h.settings.batch_size = 2;
        h.store
            .write_json(
                EXTRACTION_FILE,
                &[
                    extraction("https://x/1", None),
                    ExtractionRecord {
                        url: "https://x/2".into(),
                        extraction: serde_json::Map::new(),
                    },
                ],
            )
            .unwrap();

        build_structure(&h.ctx()).await.unwrap();

        assert_eq!(llm.call_count(), 0);
        let structure: CategoryStructure = h.store.read_json(STRUCTURE_FILE).unwrap();
        assert!(structure.main_navigation.is_empty());
    }

    #[tokio::test]
    async fn step4_empty_answer_is_an_empty_partial() {
        let llm = ScriptedModel::new(|_| Ok("{}".to_string()));
        let h = Harness::new(Arc::default(), Arc::clone(&llm));
        h.store
            .write_json(EXTRACTION_FILE, &[extraction("https://x/1", Some("Garden"))])
            .unwrap();

        build_structure(&h.ctx()).await.unwrap();

        assert_eq!(llm.call_count(), 1);
        let structure: CategoryStructure = h.store.read_json(STRUCTURE_FILE).unwrap();
        assert!(structure.main_navigation.is_empty());
    }

    #[tokio::test]
    async fn step4_rejects_malformed_extraction_artifact() {
        let h = Harness::new(Arc::default(), ScriptedModel::happy());
        h.store
            .write(EXTRACTION_FILE, br#"[{"url":"u","extraction":"nope"}]"#)
            .unwrap();
        let err = build_structure(&h.ctx()).await.unwrap_err();
        assert!(matches!(err, NexusError::MissingInput { .. }));
    }

    #[tokio::test]
    async fn step5_retries_with_strict_instruction() {
        let llm = ScriptedModel::new(|request| {
            if request.messages[1].content.starts_with("Output ONLY valid JSON") {
                Ok(r#"{"categories":[{"name":"Home","subcategories":[{"name":"Lamps"}]}]}"#.into())
            } else {
                Ok("Let me think about it...".into())
            }
        });
        let h = Harness::new(Arc::default(), Arc::clone(&llm));
        h.store
            .write_json(STRUCTURE_FILE, &CategoryStructure::default())
            .unwrap();

        assert_eq!(finalize_categories(&h.ctx()).await.unwrap(), StepOutcome::Written);

        let calls = llm.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].max_tokens, 16000);
        assert_eq!(
            calls[0].messages[1].content,
            "Here is the input list:\n{\"main_navigation\":[]}"
        );
        assert_eq!(
            calls[1].messages[1].content,
            "Output ONLY valid JSON. No text.\n\n{\"main_navigation\":[]}"
        );
        assert!(h.store.exists(FINAL_FILE));
        assert!(h.recorder.contains("  - Lamps"));
    }

    #[tokio::test]
    async fn step5_exhausted_retries_write_nothing() {
        let llm = ScriptedModel::new(|_| Err(NexusError::Network("timeout".into())));
        let mut h = Harness::new(Arc::default(), Arc::clone(&llm));
        h.settings.final_retries = 1;
        h.store
            .write_json(STRUCTURE_FILE, &CategoryStructure::default())
            .unwrap();

        assert_eq!(
            finalize_categories(&h.ctx()).await.unwrap(),
            StepOutcome::NotWritten
        );
        assert_eq!(llm.call_count(), 2);
        assert!(!h.store.exists(FINAL_FILE));
    }

    #[tokio::test]
    async fn cancelled_step_writes_nothing() {
        let h = Harness::new(Arc::default(), ScriptedModel::happy());
        h.store
            .write_lines(PRODUCTS_FILE, &["https://x/1.html".to_string()])
            .unwrap();
        h.cancel.cancel();

        assert_eq!(fetch_content(&h.ctx()).await.unwrap(), StepOutcome::Cancelled);
        assert!(!h.store.exists(CONTENT_FILE));
    }
}
