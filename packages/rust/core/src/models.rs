//! Default model picks from an OpenRouter listing.

use nexus_openrouter::ModelInfo;

/// Cheap, fast models suited to per-product extraction and batch structuring.
const FAST_MODELS: &[&str] = &[
    "google/gemini-flash-1.5",
    "anthropic/claude-3-haiku",
    "openai/gpt-4o-mini",
    "google/gemini-2.0-flash-exp",
];

/// Stronger models for the single finalization call.
const REASONING_MODELS: &[&str] = &[
    "openai/o1-mini",
    "qwen/qwq-32b-preview",
    "deepseek/deepseek-chat",
    "anthropic/claude-3.7-sonnet",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelSuggestions {
    /// Used for both step 3 and step 4.
    pub fast: Option<String>,
    /// Used for step 5.
    pub reasoning: Option<String>,
}

/// First model of each preference list that the listing offers.
pub fn suggest_models(models: &[ModelInfo]) -> ModelSuggestions {
    let pick = |preferred: &[&str]| {
        preferred
            .iter()
            .find(|id| models.iter().any(|m| m.id == **id))
            .map(|id| id.to_string())
    };

    ModelSuggestions {
        fast: pick(FAST_MODELS),
        reasoning: pick(REASONING_MODELS),
    }
}
