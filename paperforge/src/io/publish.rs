//! Publishing a finished project as a GitHub repository.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument};

use crate::core::types::Publication;
use crate::io::config::PublishConfig;
use crate::io::git::Git;
use crate::io::process::run_command_with_timeout;

const GH_TIMEOUT: Duration = Duration::from_secs(300);
const GH_OUTPUT_LIMIT: usize = 100_000;

pub trait Publisher {
    fn publish(&self, project_dir: &Path, repo_name: &str) -> Result<Publication>;
}

/// Commits the project and pushes it with `gh repo create`.
#[derive(Debug, Clone)]
pub struct GhPublisher {
    config: PublishConfig,
}

impl GhPublisher {
    pub fn new(config: PublishConfig) -> Self {
        Self { config }
    }

    fn qualified_name(&self, repo_name: &str) -> String {
        match self.config.owner.trim() {
            "" => repo_name.to_string(),
            owner => format!("{owner}/{repo_name}"),
        }
    }
}

impl Publisher for GhPublisher {
    #[instrument(skip_all, fields(project = %project_dir.display(), repo_name))]
    fn publish(&self, project_dir: &Path, repo_name: &str) -> Result<Publication> {
        let git = Git::new(project_dir);
        git.init()?;
        git.add_all()?;
        git.commit_staged("Add generated reproduction")?;

        let qualified = self.qualified_name(repo_name);
        let visibility = if self.config.private {
            "--private"
        } else {
            "--public"
        };
        let mut cmd = Command::new("gh");
        cmd.args(["repo", "create", &qualified, visibility, "--source", ".", "--push"])
            .current_dir(project_dir);
        let output = run_command_with_timeout(cmd, None, GH_TIMEOUT, GH_OUTPUT_LIMIT)
            .context("run gh repo create")?;
        if !output.succeeded() {
            return Err(anyhow!(
                "gh repo create {qualified} failed: {}",
                output.stderr_lossy().trim()
            ));
        }

        let stdout = output.stdout_lossy();
        let repo_url = parse_repo_url(&stdout)
            .ok_or_else(|| anyhow!("gh repo create printed no repository URL"))?;
        info!(%repo_url, "published repository");
        Ok(Publication {
            repo_name: qualified,
            repo_url,
        })
    }
}

fn parse_repo_url(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("https://"))
        .map(str::to_string)
}

/// Repository name for a run.
pub fn repo_name_for(run_id: &str) -> String {
    let short: String = run_id.chars().filter(|c| *c != '-').take(10).collect();
    format!("paperforge-{short}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_url_from_gh_output() {
        let stdout = "✓ Created repository lab/paperforge-abc on GitHub\nhttps://github.com/lab/paperforge-abc\n";
        assert_eq!(
            parse_repo_url(stdout).as_deref(),
            Some("https://github.com/lab/paperforge-abc")
        );
        assert_eq!(parse_repo_url("nothing here\n"), None);
    }

    #[test]
    fn qualifies_with_owner() {
        let publisher = GhPublisher::new(PublishConfig {
            owner: "lab".to_string(),
            private: false,
        });
        assert_eq!(publisher.qualified_name("repo"), "lab/repo");
        let anonymous = GhPublisher::new(PublishConfig::default());
        assert_eq!(anonymous.qualified_name("repo"), "repo");
    }

    #[test]
    fn repo_name_uses_run_id_prefix() {
        assert_eq!(
            repo_name_for("0b9e6c2a-1f3d-4c55-9a0e-123456789abc"),
            "paperforge-0b9e6c2a1f"
        );
    }
}
