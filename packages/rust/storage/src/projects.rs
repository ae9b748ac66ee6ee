//! Project directories and their `project_settings.json`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use nexus_shared::{
    NexusError, PROMPTS_FILE, ProjectConfig, PromptConfig, Result, SETTINGS_FILE, StepId,
    StepsCompleted,
};
use tracing::{info, instrument, warn};

use crate::ArtifactStore;

/// One entry of [`ProjectManager::list_projects`].
#[derive(Debug, Clone)]
pub struct ProjectSummary {
    pub name: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

/// Manages the projects under a base directory and tracks the current one.
#[derive(Debug, Clone)]
pub struct ProjectManager {
    base_dir: PathBuf,
    current: Option<PathBuf>,
}

impl ProjectManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            current: None,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Create `<base>/<name>` with fresh settings and make it current.
    #[instrument(skip(self), fields(base_dir = %self.base_dir.display()))]
    pub fn create_project(&mut self, name: &str) -> Result<PathBuf> {
        let name = name.trim();
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(NexusError::validation(format!(
                "invalid project name '{name}'"
            )));
        }

        let path = self.base_dir.join(name);
        if path.join(SETTINGS_FILE).exists() {
            return Err(NexusError::validation(format!(
                "project '{name}' already exists at {}",
                path.display()
            )));
        }

        std::fs::create_dir_all(&path).map_err(|e| NexusError::io(&path, e))?;
        save_config(&path, &ProjectConfig::new(name))?;

        info!(project = %name, path = %path.display(), "project created");
        self.current = Some(path.clone());
        Ok(path)
    }

    /// Make an existing project current and return its settings.
    pub fn load_project(&mut self, path: &Path) -> Result<ProjectConfig> {
        if !path.is_dir() {
            return Err(NexusError::not_found(path.display().to_string()));
        }

        let config = if path.join(SETTINGS_FILE).exists() {
            load_config(path)?
        } else {
            // A bare directory is adopted as a project.
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            let config = ProjectConfig::new(name);
            save_config(path, &config)?;
            config
        };

        self.current = Some(path.to_path_buf());
        Ok(config)
    }

    /// Projects with a settings file, most recently modified first.
    pub fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        if !self.base_dir.is_dir() {
            return Ok(Vec::new());
        }

        let entries =
            std::fs::read_dir(&self.base_dir).map_err(|e| NexusError::io(&self.base_dir, e))?;

        let mut projects = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.join(SETTINGS_FILE).is_file() {
                continue;
            }
            match load_config(&path) {
                Ok(config) => projects.push(ProjectSummary {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    path,
                    created_at: config.created_at,
                    last_modified: config.last_modified,
                }),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable project"),
            }
        }

        projects.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(projects)
    }

    pub fn current(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    fn require_current(&self) -> Result<&Path> {
        self.current()
            .ok_or_else(|| NexusError::validation("no project is loaded"))
    }

    /// Artifact store rooted at the current project.
    pub fn artifact_store(&self) -> Result<ArtifactStore> {
        Ok(ArtifactStore::new(self.require_current()?))
    }

    pub fn project_config(&self) -> Result<ProjectConfig> {
        load_config(self.require_current()?)
    }

    /// Record a step's completion flag and bump `last_modified`.
    pub fn update_step_status(&self, step: StepId, completed: bool) -> Result<()> {
        let path = self.require_current()?;
        let mut config = load_config(path)?;
        config.steps_completed.set(step, completed);
        config.last_modified = Utc::now();
        save_config(path, &config)
    }

    /// Completion flags of the current project; all false when none is loaded.
    pub fn steps_status(&self) -> Result<StepsCompleted> {
        match self.current() {
            Some(path) => Ok(load_config(path)?.steps_completed),
            None => Ok(StepsCompleted::default()),
        }
    }

    pub fn save_prompt_config(&self, prompts: &PromptConfig) -> Result<PathBuf> {
        let store = self.artifact_store()?;
        store.write_json(PROMPTS_FILE, prompts)?;
        Ok(store.path(PROMPTS_FILE))
    }

    /// The project's prompt overrides, if it has any.
    pub fn load_prompt_config(&self) -> Result<Option<PromptConfig>> {
        let Some(path) = self.current() else {
            return Ok(None);
        };
        let store = ArtifactStore::new(path);
        if !store.exists(PROMPTS_FILE) {
            return Ok(None);
        }
        store.read_json(PROMPTS_FILE).map(Some)
    }
}

fn load_config(project: &Path) -> Result<ProjectConfig> {
    ArtifactStore::new(project).read_json(SETTINGS_FILE)
}

fn save_config(project: &Path, config: &ProjectConfig) -> Result<()> {
    ArtifactStore::new(project).write_json(SETTINGS_FILE, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_shared::PromptEntry;

    fn temp_base() -> PathBuf {
        std::env::temp_dir().join(format!("nexus-projects-test-{}", uuid::Uuid::now_v7()))
    }

    #[test]
    fn create_and_reload_project() {
        let base = temp_base();
        let mut manager = ProjectManager::new(&base);

        let path = manager.create_project("shop").unwrap();
        assert_eq!(manager.current(), Some(path.as_path()));
        assert!(path.join(SETTINGS_FILE).is_file());

        let mut other = ProjectManager::new(&base);
        let config = other.load_project(&path).unwrap();
        assert_eq!(config.project_name, "shop");
        assert_eq!(config.steps_completed, StepsCompleted::default());

        let _ = std::fs::remove_dir_all(&base);
    }

    #[test]
    fn duplicate_and_invalid_names_are_rejected() {
        let base = temp_base();
        let mut manager = ProjectManager::new(&base);
        manager.create_project("shop").unwrap();

        assert!(matches!(
            manager.create_project("shop"),
            Err(NexusError::Validation { .. })
        ));
        assert!(manager.create_project("a/b").is_err());
        assert!(manager.create_project("  ").is_err());

        let _ = std::fs::remove_dir_all(&base);
    }

    #[test]
    fn load_missing_project_is_not_found() {
        let mut manager = ProjectManager::new(temp_base());
        let missing = temp_base().join("nope");
        assert!(matches!(
            manager.load_project(&missing),
            Err(NexusError::NotFound { .. })
        ));
        assert!(manager.current().is_none());
    }

    #[test]
    fn step_status_updates_bump_last_modified() {
        let base = temp_base();
        let mut manager = ProjectManager::new(&base);
        manager.create_project("shop").unwrap();
        let before = manager.project_config().unwrap().last_modified;

        manager.update_step_status(StepId::Step2, true).unwrap();

        let status = manager.steps_status().unwrap();
        assert!(status.step2);
        assert!(!status.step1);
        assert!(manager.project_config().unwrap().last_modified >= before);

        let _ = std::fs::remove_dir_all(&base);
    }

    #[test]
    fn list_projects_newest_first() {
        let base = temp_base();
        let mut manager = ProjectManager::new(&base);
        manager.create_project("older").unwrap();
        manager.create_project("newer").unwrap();

        // Push "older" into the past so ordering is deterministic.
        let older = base.join("older");
        let mut config = load_config(&older).unwrap();
        config.last_modified = config.last_modified - chrono::Duration::hours(1);
        save_config(&older, &config).unwrap();

        std::fs::create_dir_all(base.join("not-a-project")).unwrap();

        let names: Vec<String> = manager
            .list_projects()
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["newer", "older"]);

        let _ = std::fs::remove_dir_all(&base);
    }

    #[test]
    fn prompt_config_roundtrip() {
        let base = temp_base();
        let mut manager = ProjectManager::new(&base);
        assert!(manager.load_prompt_config().unwrap().is_none());

        manager.create_project("shop").unwrap();
        assert!(manager.load_prompt_config().unwrap().is_none());

        let mut prompts = PromptConfig::new();
        prompts.insert(
            "step5_finalization".into(),
            PromptEntry {
                name: "Final".into(),
                system_prompt: "Optimize.".into(),
            },
        );
        manager.save_prompt_config(&prompts).unwrap();
        assert_eq!(manager.load_prompt_config().unwrap(), Some(prompts));

        let _ = std::fs::remove_dir_all(&base);
    }
}
