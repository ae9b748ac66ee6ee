//! Application configuration for Nexus.
//!
//! User config lives at `~/.nexus/nexus.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{NexusError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "nexus.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".nexus";

// ---------------------------------------------------------------------------
// Config structs (matching nexus.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// OpenRouter settings.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Jina Reader settings.
    #[serde(default)]
    pub reader: ReaderConfig,

    /// Worker counts, retry caps and batching.
    #[serde(default)]
    pub workflow: WorkflowSettings,

    /// Preselected models for the LLM steps.
    #[serde(default)]
    pub models: ModelsConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory holding one sub-directory per project.
    #[serde(default = "default_projects_dir")]
    pub projects_dir: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            projects_dir: default_projects_dir(),
        }
    }
}

fn default_projects_dir() -> String {
    "projekty".into()
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_openrouter_key_env")]
    pub api_key_env: String,

    /// API root, without trailing slash.
    #[serde(default = "default_openrouter_url")]
    pub base_url: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_openrouter_key_env(),
            base_url: default_openrouter_url(),
        }
    }
}

fn default_openrouter_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_openrouter_url() -> String {
    "https://openrouter.ai/api/v1".into()
}

/// `[reader]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Name of the env var holding the Jina API key.
    #[serde(default = "default_reader_key_env")]
    pub api_key_env: String,

    /// Reader endpoint.
    #[serde(default = "default_reader_url")]
    pub base_url: String,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_reader_key_env(),
            base_url: default_reader_url(),
        }
    }
}

fn default_reader_key_env() -> String {
    "JINA_API_KEY".into()
}
fn default_reader_url() -> String {
    "https://r.jina.ai/".into()
}

/// `[workflow]` section: per-step pool sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Concurrent content fetches in step 2.
    #[serde(default = "default_reader_threads")]
    pub reader_threads: usize,
    /// Retries per URL in step 2.
    #[serde(default = "default_three")]
    pub reader_retries: u32,
    /// Concurrent extractions in step 3.
    #[serde(default = "default_one")]
    pub extract_threads: usize,
    /// Retries per product in step 3.
    #[serde(default = "default_extract_retries")]
    pub extract_retries: u32,
    /// Products per model call in step 4.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Concurrent batches in step 4.
    #[serde(default = "default_batch_threads")]
    pub batch_threads: usize,
    /// Retries per batch in step 4.
    #[serde(default = "default_three")]
    pub batch_retries: u32,
    /// Retries of the single finalization call in step 5.
    #[serde(default = "default_three")]
    pub final_retries: u32,
    /// Substring product URLs must contain when collected from a sitemap.
    #[serde(default = "default_url_filter")]
    pub url_filter: String,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            reader_threads: default_reader_threads(),
            reader_retries: default_three(),
            extract_threads: default_one(),
            extract_retries: default_extract_retries(),
            batch_size: default_batch_size(),
            batch_threads: default_batch_threads(),
            batch_retries: default_three(),
            final_retries: default_three(),
            url_filter: default_url_filter(),
        }
    }
}

fn default_reader_threads() -> usize {
    10
}
fn default_one() -> usize {
    1
}
fn default_three() -> u32 {
    3
}
fn default_extract_retries() -> u32 {
    4
}
fn default_batch_size() -> usize {
    100
}
fn default_batch_threads() -> usize {
    10
}
fn default_url_filter() -> String {
    ".html".into()
}

/// `[models]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step3: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step4: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step5: Option<String>,
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.nexus/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| NexusError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.nexus/nexus.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| NexusError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| NexusError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| NexusError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| NexusError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| NexusError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read an API key from the named env var. Empty values count as missing.
pub fn api_key_from_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Some(val),
        _ => None,
    }
}
