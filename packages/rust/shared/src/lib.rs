//! Shared types, error model, and configuration for Nexus.
//!
//! This crate is the foundation depended on by all other Nexus crates.
//! It provides:
//! - [`NexusError`], the unified error type
//! - Domain types ([`StepId`], artifact schemas, [`ProjectConfig`], [`RunId`])
//! - Configuration ([`AppConfig`], [`WorkflowSettings`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, ModelsConfig, OpenRouterConfig, ReaderConfig, WorkflowSettings,
    api_key_from_env, config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{NexusError, Result};
pub use types::{
    CONTENT_FILE, CategoryStructure, ContentRecord, EXTRACTION_FILE, ExtractionRecord, FINAL_FILE,
    MainCategory, PRODUCTS_FILE, PROMPTS_FILE, ProjectConfig, PromptConfig, PromptEntry, RunId, SETTINGS_FILE, STRUCTURE_FILE,
    StepId, StepsCompleted, Subcategory,
};
