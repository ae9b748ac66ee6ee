//! Workflow engine and domain logic for Nexus Navigation Architect.
//!
//! This crate ties the sitemap, reader and language-model collaborators to the
//! project's artifact store and runs the five-step taxonomy pipeline with
//! pause, stop and resume support.

pub mod control;
pub mod engine;
pub mod merge;
pub mod models;
pub mod observer;
pub mod pool;
pub mod prompts;
pub mod services;
mod steps;
#[cfg(test)]
mod testing;
pub mod text;

pub use control::{RunMode, RunState, StepInputs, StepModels, StepSelection};
pub use engine::WorkflowEngine;
pub use merge::{PartialCategoryTree, merge};
pub use models::{ModelSuggestions, suggest_models};
pub use observer::{SilentObserver, WorkflowObserver};
pub use pool::TaskPool;
pub use prompts::PromptSet;
pub use services::{CompletionRequest, ContentReader, LanguageModel, Services, SitemapSource};
