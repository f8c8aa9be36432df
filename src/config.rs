use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};

use crate::artifact::{DEFAULT_ARTIFACT_NAME, DEFAULT_RETENTION_DAYS};
use crate::sarif::DEFAULT_MAX_COMMENTS;

pub(crate) const DEFAULT_TOOL_PATH: &str = "tool/analysis.jar";
const DEFAULT_TEMPERATURE: &str = "0.0";
const DEFAULT_ENVIRONMENT: &str = "staging";
const DEFAULT_RUNTIME: &str = "java";

/// Where the analysis jar comes from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum BinarySource {
    /// Jar shipped alongside the action.
    #[default]
    Bundled,
    /// Jar attached to the latest release of the action repository.
    Release,
}

impl BinarySource {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Bundled => "bundled",
            Self::Release => "release",
        }
    }
}

/// Raw action inputs. Every flag falls back to the `INPUT_*` variable the
/// runner sets for `with:` values; empty values count as unset.
#[derive(Args, Debug, Clone, Default)]
pub(crate) struct Inputs {
    #[arg(long, env = "INPUT_MODEL", help = "Model identifier passed to the analyzer.")]
    pub(crate) model: Option<String>,
    #[arg(long, value_name = "PATH", env = "INPUT_REPO-PATH")]
    pub(crate) repo_path: Option<String>,
    #[arg(
        long,
        value_name = "PATH",
        env = "INPUT_RESULT-PATH",
        help = "Directory the analyzer writes security-review.sarif into."
    )]
    pub(crate) result_path: Option<String>,
    #[arg(long, env = "INPUT_TEMPERATURE")]
    pub(crate) temperature: Option<String>,
    #[arg(long, env = "INPUT_PROMPT")]
    pub(crate) prompt: Option<String>,
    #[arg(long, env = "INPUT_JBAI-TOKEN", hide_env_values = true)]
    pub(crate) jbai_token: Option<String>,
    #[arg(long, env = "INPUT_JBAI-ENVIRONMENT")]
    pub(crate) jbai_environment: Option<String>,
    #[arg(
        long,
        env = "INPUT_GITHUB-TOKEN",
        hide_env_values = true,
        help = "Enables PR annotations, code scanning upload and the SARIF artifact."
    )]
    pub(crate) github_token: Option<String>,
    #[arg(long, env = "INPUT_AUTH-TYPE")]
    pub(crate) auth_type: Option<String>,
    #[arg(long, env = "INPUT_BRANCH")]
    pub(crate) branch: Option<String>,
    #[arg(
        long,
        value_name = "bundled|release",
        env = "INPUT_BINARY-SOURCE",
        help = "Use the bundled analysis.jar or download it from the latest release."
    )]
    pub(crate) binary_source: Option<String>,
    #[arg(long, value_name = "PATH", env = "INPUT_TOOL-PATH")]
    pub(crate) tool_path: Option<String>,
    #[arg(
        long,
        value_name = "OWNER/REPO",
        env = "INPUT_RELEASE-REPOSITORY",
        help = "Repository whose latest release provides analysis.jar (defaults to the action repository)."
    )]
    pub(crate) release_repository: Option<String>,
    #[arg(long, env = "INPUT_RUNTIME", help = "Program used to launch the jar.")]
    pub(crate) runtime: Option<String>,
    #[arg(long, value_name = "N", env = "INPUT_MAX-COMMENTS")]
    pub(crate) max_comments: Option<String>,
    #[arg(long, env = "INPUT_ARTIFACT-NAME")]
    pub(crate) artifact_name: Option<String>,
    #[arg(long, value_name = "DAYS", env = "INPUT_RETENTION-DAYS")]
    pub(crate) retention_days: Option<String>,
    #[arg(
        long,
        value_name = "URL",
        env = "INPUT_OTEL",
        help = "OTLP HTTP collector URL (recommended: http://localhost:4318/)."
    )]
    pub(crate) otel: Option<String>,
}

/// Inputs with defaults applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ActionConfig {
    pub(crate) model: Option<String>,
    pub(crate) repo_path: String,
    pub(crate) result_path: PathBuf,
    pub(crate) temperature: String,
    pub(crate) prompt: Option<String>,
    pub(crate) jbai_token: Option<String>,
    pub(crate) jbai_environment: String,
    pub(crate) github_token: Option<String>,
    pub(crate) auth_type: Option<String>,
    pub(crate) branch: Option<String>,
    pub(crate) binary_source: BinarySource,
    pub(crate) tool_path: PathBuf,
    pub(crate) release_repository: Option<String>,
    pub(crate) runtime: String,
    pub(crate) max_comments: usize,
    pub(crate) artifact_name: String,
    pub(crate) retention_days: u32,
    pub(crate) otel: Option<String>,
}

impl Inputs {
    pub(crate) fn resolve(self) -> Result<ActionConfig> {
        let max_comments = parse_number(self.max_comments, "max-comments", DEFAULT_MAX_COMMENTS)?;
        let retention_days =
            parse_number(self.retention_days, "retention-days", DEFAULT_RETENTION_DAYS)?;
        let binary_source = match present(self.binary_source) {
            Some(value) => BinarySource::from_str(value.trim(), true)
                .map_err(|err| anyhow::anyhow!("invalid binary-source '{value}': {err}"))?,
            None => BinarySource::default(),
        };
        Ok(ActionConfig {
            model: present(self.model),
            repo_path: or_default(self.repo_path, "."),
            result_path: PathBuf::from(or_default(self.result_path, ".")),
            temperature: or_default(self.temperature, DEFAULT_TEMPERATURE),
            prompt: present(self.prompt),
            jbai_token: present(self.jbai_token),
            jbai_environment: or_default(self.jbai_environment, DEFAULT_ENVIRONMENT),
            github_token: present(self.github_token),
            auth_type: present(self.auth_type),
            branch: present(self.branch),
            binary_source,
            tool_path: PathBuf::from(or_default(self.tool_path, DEFAULT_TOOL_PATH)),
            release_repository: present(self.release_repository),
            runtime: or_default(self.runtime, DEFAULT_RUNTIME),
            max_comments,
            artifact_name: or_default(self.artifact_name, DEFAULT_ARTIFACT_NAME),
            retention_days,
            otel: present(self.otel),
        })
    }
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn or_default(value: Option<String>, default: &str) -> String {
    present(value).unwrap_or_else(|| default.to_string())
}

fn parse_number<T>(value: Option<String>, name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match present(value) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("invalid {name} '{value}'")),
        None => Ok(default),
    }
}
