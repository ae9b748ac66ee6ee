//! System prompts for the three model-driven steps.
//!
//! Built-in defaults can be overridden per project through
//! `prompts_config.json`.

use nexus_shared::{NexusError, PromptConfig, PromptEntry, Result, StepId};

pub const EXTRACTION_KEY: &str = "step3_extraction";
pub const STRUCTURE_KEY: &str = "step4_structure";
pub const FINALIZATION_KEY: &str = "step5_finalization";

const DEFAULT_EXTRACTION: &str = r#"You are a product data analyst for an e-commerce store.
You receive the plain-text content of a single product page.
Extract the product's key attributes and return ONLY a JSON object with this shape:
{
  "product_name": string,
  "brand": string | null,
  "product_category": {
    "main_category": string | null,
    "subcategory": string | null
  },
  "attributes": { "<attribute name>": "<value>" }
}
Use null for anything the page does not state. Do not add commentary."#;

const DEFAULT_STRUCTURE: &str = r#"You are an information architect designing store navigation.
You receive a JSON array of product extractions.
Group the products into a two-level navigation and return ONLY a JSON object:
{
  "main_navigation": [
    { "name": "<main category>", "subcategories": [ { "name": "<subcategory>" } ] }
  ]
}
Use short, customer-facing names. Do not add commentary."#;

const DEFAULT_FINALIZATION: &str = r#"You are a senior e-commerce taxonomy expert.
You receive a merged navigation tree built from many product batches. It may contain
duplicates, near-synonyms and overly fine-grained branches.
Merge synonyms, remove duplicates, balance the tree and return ONLY a JSON object:
{
  "categories": [
    { "name": "<category>", "subcategories": [ { "name": "<subcategory>", "subcategories": [] } ] }
  ]
}
Do not add commentary."#;

/// The three system prompts used by steps 3 to 5.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    pub extraction: String,
    pub structure: String,
    pub finalization: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            extraction: DEFAULT_EXTRACTION.to_string(),
            structure: DEFAULT_STRUCTURE.to_string(),
            finalization: DEFAULT_FINALIZATION.to_string(),
        }
    }
}

impl PromptSet {
    /// Defaults with any non-empty project overrides applied.
    pub fn with_overrides(overrides: Option<&PromptConfig>) -> Self {
        let mut prompts = Self::default();
        let Some(config) = overrides else {
            return prompts;
        };

        for (key, slot) in [
            (EXTRACTION_KEY, &mut prompts.extraction),
            (STRUCTURE_KEY, &mut prompts.structure),
            (FINALIZATION_KEY, &mut prompts.finalization),
        ] {
            if let Some(entry) = config.get(key) {
                if !entry.system_prompt.trim().is_empty() {
                    *slot = entry.system_prompt.clone();
                }
            }
        }
        prompts
    }

    /// The prompt for a model-driven step; `None` for steps 1 and 2.
    pub fn for_step(&self, step: StepId) -> Option<&str> {
        match step {
            StepId::Step3 => Some(self.extraction.as_str()),
            StepId::Step4 => Some(self.structure.as_str()),
            StepId::Step5 => Some(self.finalization.as_str()),
            StepId::Step1 | StepId::Step2 => None,
        }
    }

    /// All three prompts must be non-empty.
    pub fn validate(&self) -> Result<()> {
        for (key, prompt) in [
            (EXTRACTION_KEY, &self.extraction),
            (STRUCTURE_KEY, &self.structure),
            (FINALIZATION_KEY, &self.finalization),
        ] {
            if prompt.trim().is_empty() {
                return Err(NexusError::validation(format!("prompt '{key}' is empty")));
            }
        }
        Ok(())
    }

    /// The `prompts_config.json` form of this set.
    pub fn to_config(&self) -> PromptConfig {
        [
            (EXTRACTION_KEY, "Product attribute extraction", &self.extraction),
            (STRUCTURE_KEY, "Category structure", &self.structure),
            (FINALIZATION_KEY, "Category finalization", &self.finalization),
        ]
        .into_iter()
        .map(|(key, name, prompt)| {
            (
                key.to_string(),
                PromptEntry {
                    name: name.to_string(),
                    system_prompt: prompt.clone(),
                },
            )
        })
        .collect()
    }
}
