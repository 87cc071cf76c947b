//! Stage logging under `<output_dir>/<run_id>/`.
//!
//! Each executed stage gets `stages/NN-<stage>.json`; `record.json` is
//! rewritten atomically after every stage so a crashed run leaves its last
//! committed state behind.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::routing::Stage;
use crate::core::types::RunRecord;
use crate::io::config::write_atomic;
use crate::io::project::RunPaths;

#[derive(Debug, Clone, Serialize)]
pub struct StageMeta {
    pub run_id: String,
    pub seq: u64,
    pub stage: Stage,
    /// Stage chosen by routing, or `None` when the run ended.
    pub next: Option<Stage>,
    pub status: String,
    pub revision_count: u32,
    pub review_iteration: u32,
    pub execution_success: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl StageMeta {
    pub fn new(
        seq: u64,
        stage: Stage,
        next: Option<Stage>,
        record: &RunRecord,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        let duration_ms = u64::try_from((ended_at - started_at).num_milliseconds()).unwrap_or(0);
        Self {
            run_id: record.run_id.clone(),
            seq,
            stage,
            next,
            status: record.status.clone(),
            revision_count: record.revision_count,
            review_iteration: record.review_iteration,
            execution_success: record.execution_success,
            started_at,
            ended_at,
            duration_ms,
        }
    }
}

pub fn stage_log_path(paths: &RunPaths, seq: u64, stage: Stage) -> PathBuf {
    paths
        .stages_dir
        .join(format!("{seq:02}-{}.json", stage.as_str()))
}

/// Write the stage metadata and refresh the record snapshot.
pub fn write_stage(paths: &RunPaths, meta: &StageMeta, record: &RunRecord) -> Result<PathBuf> {
    fs::create_dir_all(&paths.stages_dir)
        .with_context(|| format!("create stages dir {}", paths.stages_dir.display()))?;
    let path = stage_log_path(paths, meta.seq, meta.stage);
    write_json(&path, meta)?;
    write_record(&paths.record_path, record)?;
    Ok(path)
}

pub fn write_record(path: &Path, record: &RunRecord) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(record).context("serialize run record")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}
