//! Named step artifacts inside one project directory.

use std::path::{Path, PathBuf};

use chrono::Local;
use nexus_shared::{NexusError, Result, StepId};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

/// Sub-directory receiving copies of overwritten artifacts.
pub const BACKUP_DIR: &str = "backups";

/// Reads and writes artifacts by file name under a project root.
///
/// Writes go to a hidden temp file first and are renamed into place, so a
/// reader never observes a half-written artifact.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    /// Raw bytes of an artifact; [`NexusError::NotFound`] when absent.
    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path(name);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(NexusError::not_found(name)),
            Err(e) => Err(NexusError::io(path, e)),
        }
    }

    pub fn read_to_string(&self, name: &str) -> Result<String> {
        let bytes = self.read(name)?;
        String::from_utf8(bytes).map_err(|e| NexusError::parse(format!("{name}: not UTF-8: {e}")))
    }

    /// Atomically replace `name` with `bytes`.
    pub fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        std::fs::create_dir_all(&self.root).map_err(|e| NexusError::io(&self.root, e))?;

        let target = self.path(name);
        let temp = self.root.join(format!(".{name}.tmp"));

        std::fs::write(&temp, bytes).map_err(|e| NexusError::io(&temp, e))?;
        std::fs::rename(&temp, &target).map_err(|e| NexusError::io(&target, e))?;

        debug!(file = %name, size = bytes.len(), "wrote artifact");
        Ok(())
    }

    /// Copy the current version of `name` to `backups/<stem>_<timestamp><ext>`.
    ///
    /// Returns `None` when there is nothing to back up. A `_<n>` suffix is
    /// appended when a backup with the same timestamp already exists.
    pub fn backup(&self, name: &str) -> Result<Option<PathBuf>> {
        let source = self.path(name);
        if !source.is_file() {
            return Ok(None);
        }

        let dir = self.root.join(BACKUP_DIR);
        std::fs::create_dir_all(&dir).map_err(|e| NexusError::io(&dir, e))?;

        let file = Path::new(name);
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string());
        let ext = file
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");

        let mut target = dir.join(format!("{stem}_{timestamp}{ext}"));
        let mut n = 1;
        while target.exists() {
            target = dir.join(format!("{stem}_{timestamp}_{n}{ext}"));
            n += 1;
        }

        std::fs::copy(&source, &target).map_err(|e| NexusError::io(&target, e))?;
        info!(file = %name, backup = %target.display(), "backed up artifact");
        Ok(Some(target))
    }

    /// A step counts as completed when its artifact exists.
    pub fn step_completed(&self, step: StepId) -> bool {
        self.exists(step.artifact())
    }

    pub fn step_status(&self) -> Vec<(StepId, bool)> {
        StepId::ALL
            .iter()
            .map(|&step| (step, self.step_completed(step)))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Typed helpers
    // -----------------------------------------------------------------------

    pub fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let content = self.read_to_string(name)?;
        serde_json::from_str(&content).map_err(|e| NexusError::parse(format!("{name}: {e}")))
    }

    /// Pretty-printed JSON; non-ASCII text is written as-is.
    pub fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        let content = serde_json::to_string_pretty(value)
            .map_err(|e| NexusError::parse(format!("{name}: {e}")))?;
        self.write(name, content.as_bytes())
    }

    /// Trimmed, non-blank lines.
    pub fn read_lines(&self, name: &str) -> Result<Vec<String>> {
        Ok(self
            .read_to_string(name)?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    pub fn write_lines(&self, name: &str, lines: &[String]) -> Result<()> {
        self.write(name, lines.join("\n").as_bytes())
    }
}
