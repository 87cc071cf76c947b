//! Paper text extraction.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::io::process::run_command_with_timeout;

const PDFTOTEXT_TIMEOUT: Duration = Duration::from_secs(120);
const PDFTOTEXT_OUTPUT_LIMIT: usize = 20_000_000;

/// Source of the raw paper text handed to the parser stage.
pub trait DocumentSource {
    fn extract(&self) -> Result<String>;
}

/// A paper already available as plain text or Markdown.
#[derive(Debug, Clone)]
pub struct TextFileSource {
    pub path: PathBuf,
}

impl DocumentSource for TextFileSource {
    fn extract(&self) -> Result<String> {
        fs::read_to_string(&self.path).with_context(|| format!("read {}", self.path.display()))
    }
}

/// A PDF converted with poppler's `pdftotext`.
#[derive(Debug, Clone)]
pub struct PdfToTextSource {
    pub path: PathBuf,
}

impl DocumentSource for PdfToTextSource {
    #[instrument(skip_all, fields(path = %self.path.display()))]
    fn extract(&self) -> Result<String> {
        let mut cmd = Command::new("pdftotext");
        cmd.arg("-layout").arg(&self.path).arg("-");
        let output = run_command_with_timeout(cmd, None, PDFTOTEXT_TIMEOUT, PDFTOTEXT_OUTPUT_LIMIT)
            .context("run pdftotext")?;
        if !output.succeeded() {
            return Err(anyhow!(
                "pdftotext failed for {}: {}",
                self.path.display(),
                output.stderr_lossy().trim()
            ));
        }
        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(chars = text.chars().count(), "extracted pdf text");
        Ok(text)
    }
}

/// Pick a source by file extension.
pub fn source_for(path: &Path) -> Box<dyn DocumentSource> {
    let is_pdf = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if is_pdf {
        Box::new(PdfToTextSource {
            path: path.to_path_buf(),
        })
    } else {
        Box::new(TextFileSource {
            path: path.to_path_buf(),
        })
    }
}
