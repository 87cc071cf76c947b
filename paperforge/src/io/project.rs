//! On-disk layout for one pipeline run and its materialized attempts.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::core::materialize::ProjectFiles;

/// Directories owned by one run under `<output_dir>/<run_id>`.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub run_dir: PathBuf,
    pub attempts_dir: PathBuf,
    pub stages_dir: PathBuf,
    pub record_path: PathBuf,
}

impl RunPaths {
    pub fn new(output_dir: &Path, run_id: &str) -> Self {
        let run_dir = output_dir.join(run_id);
        Self {
            attempts_dir: run_dir.join("attempts"),
            stages_dir: run_dir.join("stages"),
            record_path: run_dir.join("record.json"),
            run_dir,
        }
    }

    /// Path of the attempt directory for the given counters.
    pub fn attempt_dir(&self, seq: u32, review_iteration: u32, revision: u32) -> PathBuf {
        self.attempts_dir.join(format!(
            "attempt-{seq:02}-i{review_iteration}-r{revision}"
        ))
    }

    /// Create a fresh attempt directory. Fails if it already exists.
    pub fn create_attempt_dir(
        &self,
        seq: u32,
        review_iteration: u32,
        revision: u32,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.attempts_dir)
            .with_context(|| format!("create attempts dir {}", self.attempts_dir.display()))?;
        let dir = self.attempt_dir(seq, review_iteration, revision);
        fs::create_dir(&dir).with_context(|| format!("create attempt dir {}", dir.display()))?;
        debug!(dir = %dir.display(), "created attempt dir");
        Ok(dir)
    }
}

/// Write every file of `files` below `root`, creating parent directories.
pub fn write_project(root: &Path, files: &ProjectFiles) -> Result<()> {
    for (relative, contents) in files {
        let path = project_path(root, relative)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
    }
    mark_scripts_executable(root)?;
    Ok(())
}

fn project_path(root: &Path, relative: &str) -> Result<PathBuf> {
    let rel = Path::new(relative);
    let escapes = rel.is_absolute()
        || rel
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir));
    if escapes {
        return Err(anyhow!("project path escapes root: {relative}"));
    }
    Ok(root.join(rel))
}

#[cfg(unix)]
fn mark_scripts_executable(root: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let scripts = root.join("scripts");
    if !scripts.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(&scripts).with_context(|| format!("read {}", scripts.display()))? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "sh") {
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
                .with_context(|| format!("chmod {}", path.display()))?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn mark_scripts_executable(_root: &Path) -> Result<()> {
    Ok(())
}
