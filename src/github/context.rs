use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

pub(crate) const DEFAULT_API_URL: &str = "https://api.github.com";

/// `owner/name` pair identifying a repository.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RepoRef {
    pub(crate) owner: String,
    pub(crate) name: String,
}

impl RepoRef {
    pub(crate) fn parse(value: &str) -> Result<Self> {
        let (owner, name) = value
            .trim()
            .split_once('/')
            .with_context(|| format!("invalid repository '{value}': expected owner/name"))?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            anyhow::bail!("invalid repository '{value}': expected owner/name");
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Pull request that triggered the workflow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct PullRequestContext {
    pub(crate) number: u64,
    pub(crate) head_sha: Option<String>,
}

/// Workflow run context read from the runner environment.
#[derive(Clone, Debug, Default)]
pub(crate) struct ActionContext {
    pub(crate) repository: Option<RepoRef>,
    pub(crate) sha: Option<String>,
    pub(crate) git_ref: Option<String>,
    pub(crate) api_url: String,
    pub(crate) pull_request: Option<PullRequestContext>,
    pub(crate) output_file: Option<PathBuf>,
    pub(crate) runner_temp: Option<PathBuf>,
    pub(crate) action_repository: Option<String>,
    pub(crate) in_actions: bool,
}

#[derive(Deserialize)]
struct EventPayload {
    pull_request: Option<PullRequestPayload>,
}

#[derive(Deserialize)]
struct PullRequestPayload {
    number: u64,
    head: Option<HeadPayload>,
}

#[derive(Deserialize)]
struct HeadPayload {
    sha: Option<String>,
}

impl ActionContext {
    pub(crate) fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the context from a variable lookup; empty values count as unset.
    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let repository = get("GITHUB_REPOSITORY").and_then(|value| match RepoRef::parse(&value) {
            Ok(repo) => Some(repo),
            Err(err) => {
                warn!("ignoring GITHUB_REPOSITORY: {err:#}");
                None
            }
        });
        let pull_request = get("GITHUB_EVENT_PATH").and_then(|path| {
            match read_pull_request(Path::new(&path)) {
                Ok(pull_request) => pull_request,
                Err(err) => {
                    warn!("failed to read workflow event payload: {err:#}");
                    None
                }
            }
        });
        Self {
            repository,
            sha: get("GITHUB_SHA"),
            git_ref: get("GITHUB_REF"),
            api_url: get("GITHUB_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            pull_request,
            output_file: get("GITHUB_OUTPUT").map(PathBuf::from),
            runner_temp: get("RUNNER_TEMP").map(PathBuf::from),
            action_repository: get("GITHUB_ACTION_REPOSITORY"),
            in_actions: get("GITHUB_ACTIONS").is_some(),
        }
    }

    pub(crate) fn require_repository(&self) -> Result<&RepoRef> {
        self.repository
            .as_ref()
            .context("GITHUB_REPOSITORY is not set")
    }

    /// Publishes a step output for downstream workflow steps.
    pub(crate) fn set_output(&self, name: &str, value: &str) -> Result<()> {
        let Some(path) = self.output_file.as_deref() else {
            info!("output {name}={value}");
            return Ok(());
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open output file {}", path.display()))?;
        writeln!(file, "{name}={value}")
            .with_context(|| format!("failed to write output file {}", path.display()))?;
        Ok(())
    }

    /// Asks the runner to redact `secret` from all subsequent log lines.
    pub(crate) fn mask_secret(&self, secret: &str) {
        if self.in_actions && !secret.is_empty() {
            println!("::add-mask::{secret}");
        }
    }
}

fn read_pull_request(path: &Path) -> Result<Option<PullRequestContext>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let payload: EventPayload =
        serde_json::from_str(&content).context("failed to parse event payload")?;
    Ok(payload.pull_request.map(|pull_request| PullRequestContext {
        number: pull_request.number,
        head_sha: pull_request.head.and_then(|head| head.sha),
    }))
}
