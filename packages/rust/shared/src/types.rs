//! Core domain types: step ids, artifact schemas and the project config record.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `products.txt`: one product URL per line.
pub const PRODUCTS_FILE: &str = "products.txt";
/// `content_website.json`: fetched page content.
pub const CONTENT_FILE: &str = "content_website.json";
/// `product_extraction.json`: per-product attribute extraction.
pub const EXTRACTION_FILE: &str = "product_extraction.json";
/// `categories_structure.json`: merged category tree.
pub const STRUCTURE_FILE: &str = "categories_structure.json";
/// `categories_final.json`: model-optimized category tree.
pub const FINAL_FILE: &str = "categories_final.json";
/// Project metadata file.
pub const SETTINGS_FILE: &str = "project_settings.json";
/// Per-project prompt overrides.
pub const PROMPTS_FILE: &str = "prompts_config.json";

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 identifying one execution context of the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// StepId
// ---------------------------------------------------------------------------

/// One of the five fixed pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StepId {
    Step1,
    Step2,
    Step3,
    Step4,
    Step5,
}

impl StepId {
    pub const ALL: [StepId; 5] = [
        StepId::Step1,
        StepId::Step2,
        StepId::Step3,
        StepId::Step4,
        StepId::Step5,
    ];

    /// 1-based position in the pipeline.
    pub fn index(self) -> u8 {
        match self {
            Self::Step1 => 1,
            Self::Step2 => 2,
            Self::Step3 => 3,
            Self::Step4 => 4,
            Self::Step5 => 5,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index).checked_sub(1)?).copied()
    }

    /// Artifact this step produces.
    pub fn artifact(self) -> &'static str {
        match self {
            Self::Step1 => PRODUCTS_FILE,
            Self::Step2 => CONTENT_FILE,
            Self::Step3 => EXTRACTION_FILE,
            Self::Step4 => STRUCTURE_FILE,
            Self::Step5 => FINAL_FILE,
        }
    }

    /// The step whose artifact this step consumes.
    pub fn previous(self) -> Option<Self> {
        Self::from_index(self.index() - 1)
    }

    /// Key used in `steps_completed` and log lines.
    pub fn key(self) -> &'static str {
        match self {
            Self::Step1 => "step1",
            Self::Step2 => "step2",
            Self::Step3 => "step3",
            Self::Step4 => "step4",
            Self::Step5 => "step5",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Step1 => "Collect product URLs",
            Self::Step2 => "Fetch page content",
            Self::Step3 => "Extract product attributes",
            Self::Step4 => "Build category structure",
            Self::Step5 => "Finalize categories",
        }
    }

    /// Whether the step calls the language model.
    pub fn needs_model(self) -> bool {
        self.index() >= 3
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "step {} ({})", self.index(), self.label())
    }
}

// ---------------------------------------------------------------------------
// Artifact schemas
// ---------------------------------------------------------------------------

/// One entry of `content_website.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One entry of `product_extraction.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub url: String,
    /// Model-extracted attributes; empty when extraction failed.
    #[serde(default)]
    pub extraction: serde_json::Map<String, serde_json::Value>,
}

impl ExtractionRecord {
    /// `extraction.product_category.main_category`, if set to a non-null value.
    pub fn main_category(&self) -> Option<&serde_json::Value> {
        self.extraction
            .get("product_category")?
            .get("main_category")
            .filter(|v| !v.is_null())
    }
}

/// Root of `categories_structure.json` and of each step-4 model answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryStructure {
    #[serde(default)]
    pub main_navigation: Vec<MainCategory>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainCategory {
    pub name: String,
    #[serde(default)]
    pub subcategories: Vec<Subcategory>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subcategory {
    pub name: String,
}

// ---------------------------------------------------------------------------
// Prompt config
// ---------------------------------------------------------------------------

/// One named system prompt, as stored in `prompts_config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub system_prompt: String,
}

/// `prompts_config.json`: prompt key (e.g. `step3_extraction`) to prompt.
pub type PromptConfig = BTreeMap<String, PromptEntry>;

// ---------------------------------------------------------------------------
// Project config
// ---------------------------------------------------------------------------

/// The `project_settings.json` structure stored at the root of each project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub project_name: String,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub steps_completed: StepsCompleted,
}

impl ProjectConfig {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            project_name: name.into(),
            created_at: now,
            last_modified: now,
            steps_completed: StepsCompleted::default(),
        }
    }
}

/// Per-step completion flags as recorded in the project config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepsCompleted {
    #[serde(default)]
    pub step1: bool,
    #[serde(default)]
    pub step2: bool,
    #[serde(default)]
    pub step3: bool,
    #[serde(default)]
    pub step4: bool,
    #[serde(default)]
    pub step5: bool,
}

impl StepsCompleted {
    pub fn get(&self, step: StepId) -> bool {
        match step {
            StepId::Step1 => self.step1,
            StepId::Step2 => self.step2,
            StepId::Step3 => self.step3,
            StepId::Step4 => self.step4,
            StepId::Step5 => self.step5,
        }
    }

    pub fn set(&mut self, step: StepId, done: bool) {
        let slot = match step {
            StepId::Step1 => &mut self.step1,
            StepId::Step2 => &mut self.step2,
            StepId::Step3 => &mut self.step3,
            StepId::Step4 => &mut self.step4,
            StepId::Step5 => &mut self.step5,
        };
        *slot = done;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_ids_are_ordered_and_linked() {
        assert_eq!(StepId::from_index(0), None);
        assert_eq!(StepId::from_index(3), Some(StepId::Step3));
        assert_eq!(StepId::from_index(6), None);
        assert_eq!(StepId::Step1.previous(), None);
        assert_eq!(StepId::Step4.previous(), Some(StepId::Step3));
        assert!(StepId::Step2 < StepId::Step5);
        assert_eq!(StepId::Step4.artifact(), "categories_structure.json");
        assert!(!StepId::Step2.needs_model());
        assert!(StepId::Step3.needs_model());
    }

    #[test]
    fn content_record_omits_missing_error() {
        let ok = ContentRecord {
            url: "https://shop.example.com/a.html".into(),
            content: "# A".into(),
            error: None,
        };
        let json = serde_json::to_string(&ok).unwrap();
        assert!(!json.contains("error"));

        let failed: ContentRecord =
            serde_json::from_str(r#"{"url":"u","content":"","error":"HTTP 500"}"#).unwrap();
        assert_eq!(failed.error.as_deref(), Some("HTTP 500"));
    }

    #[test]
    fn extraction_must_be_an_object() {
        let bad = serde_json::from_str::<ExtractionRecord>(r#"{"url":"u","extraction":[1,2]}"#);
        assert!(bad.is_err());

        let rec: ExtractionRecord = serde_json::from_str(
            r#"{"url":"u","extraction":{"product_category":{"main_category":"Shoes"}}}"#,
        )
        .unwrap();
        assert_eq!(rec.main_category(), Some(&serde_json::json!("Shoes")));

        let null_cat: ExtractionRecord = serde_json::from_str(
            r#"{"url":"u","extraction":{"product_category":{"main_category":null}}}"#,
        )
        .unwrap();
        assert!(null_cat.main_category().is_none());
    }

    #[test]
    fn project_config_roundtrip() {
        let mut config = ProjectConfig::new("shop");
        config.steps_completed.set(StepId::Step2, true);
        let json = serde_json::to_string_pretty(&config).unwrap();
        assert!(json.contains(r#""step2": true"#));
        let parsed: ProjectConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.project_name, "shop");
        assert!(parsed.steps_completed.get(StepId::Step2));
        assert!(!parsed.steps_completed.get(StepId::Step1));
    }

    #[test]
    fn prompt_config_parses_keyed_entries() {
        let parsed: PromptConfig = serde_json::from_str(
            r#"{"step3_extraction":{"name":"Extraction","system_prompt":"Extract."}}"#,
        )
        .unwrap();
        assert_eq!(parsed["step3_extraction"].system_prompt, "Extract.");
    }

    #[test]
    fn category_structure_tolerates_missing_subcategories() {
        let parsed: CategoryStructure =
            serde_json::from_str(r#"{"main_navigation":[{"name":"Garden"}]}"#).unwrap();
        assert_eq!(parsed.main_navigation[0].name, "Garden");
        assert!(parsed.main_navigation[0].subcategories.is_empty());
    }

    #[test]
    fn category_structure_defaults_to_empty_navigation() {
        let parsed: CategoryStructure = serde_json::from_str("{}").unwrap();
        assert!(parsed.main_navigation.is_empty());
    }
}
