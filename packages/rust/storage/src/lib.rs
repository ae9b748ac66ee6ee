//! File-backed project storage.
//!
//! A project is a directory holding `project_settings.json`, the five step
//! artifacts, an optional `prompts_config.json` and a `backups/` folder.
//!
//! - [`ArtifactStore`] reads and atomically writes artifacts inside one project
//! - [`ProjectManager`] creates, lists and loads project directories

mod artifacts;
mod projects;

pub use artifacts::{ArtifactStore, BACKUP_DIR};
pub use projects::{ProjectManager, ProjectSummary};
