use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// Default cap on review comments created from a single SARIF log.
pub(crate) const DEFAULT_MAX_COMMENTS: usize = 50;

/// Minimal SARIF log shape consumed by the annotator.
///
/// Only the fields needed to build review comments are modelled; anything else
/// in the document is ignored during decoding.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub(crate) struct SarifLog {
    pub(crate) version: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub(crate) runs: Vec<SarifRun>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub(crate) struct SarifRun {
    #[serde(default)]
    pub(crate) tool: Option<SarifTool>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub(crate) results: Vec<SarifResult>,
}

impl SarifRun {
    pub(crate) fn driver_name(&self) -> Option<&str> {
        self.tool
            .as_ref()
            .and_then(|tool| tool.driver.as_ref())
            .and_then(|driver| driver.name.as_deref())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub(crate) struct SarifTool {
    #[serde(default)]
    pub(crate) driver: Option<SarifDriver>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub(crate) struct SarifDriver {
    #[serde(default)]
    pub(crate) name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SarifResult {
    #[serde(default)]
    pub(crate) rule_id: Option<String>,
    #[serde(default)]
    pub(crate) level: Option<SarifLevel>,
    #[serde(default)]
    pub(crate) message: Option<SarifMessage>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub(crate) locations: Vec<SarifLocation>,
}

/// SARIF `result.level` values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum SarifLevel {
    None,
    Note,
    Warning,
    Error,
}

impl SarifLevel {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            SarifLevel::None => "none",
            SarifLevel::Note => "note",
            SarifLevel::Warning => "warning",
            SarifLevel::Error => "error",
        }
    }
}

impl fmt::Display for SarifLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub(crate) struct SarifMessage {
    #[serde(default)]
    pub(crate) text: Option<String>,
    #[serde(default)]
    pub(crate) markdown: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SarifLocation {
    #[serde(default)]
    pub(crate) physical_location: Option<PhysicalLocation>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PhysicalLocation {
    #[serde(default)]
    pub(crate) artifact_location: Option<ArtifactLocation>,
    #[serde(default)]
    pub(crate) region: Option<Region>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub(crate) struct ArtifactLocation {
    #[serde(default)]
    pub(crate) uri: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Region {
    #[serde(default)]
    pub(crate) start_line: Option<i64>,
}

// SARIF allows `null` for optional arrays.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Side of the diff a review comment is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub(crate) enum DiffSide {
    #[serde(rename = "RIGHT")]
    Right,
}

/// Inline pull request review comment derived from a SARIF result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub(crate) struct PrComment {
    pub(crate) path: String,
    pub(crate) line: u64,
    pub(crate) side: DiffSide,
    pub(crate) body: String,
}

/// Decodes a SARIF document, returning `None` when it is not valid.
pub(crate) fn parse_sarif(raw: &str) -> Option<SarifLog> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    match serde_path_to_error::deserialize::<_, SarifLog>(&mut deserializer) {
        Ok(log) => Some(log),
        Err(err) => {
            let path = err.path().to_string();
            warn!(
                "failed to parse SARIF JSON at {}: {}",
                path,
                err.into_inner()
            );
            None
        }
    }
}

/// Projects SARIF results onto review comments, in document order.
///
/// Results without a file URI or a positive start line on their first location
/// are skipped. At most `max_comments` comments are returned.
pub(crate) fn build_pr_comments(log: &SarifLog, max_comments: usize) -> Vec<PrComment> {
    let mut comments = Vec::new();
    'runs: for run in &log.runs {
        for result in &run.results {
            if comments.len() >= max_comments {
                break 'runs;
            }
            let Some((path, line)) = primary_position(result) else {
                continue;
            };
            comments.push(PrComment {
                path: path.to_string(),
                line,
                side: DiffSide::Right,
                body: comment_body(result),
            });
        }
    }
    comments
}

fn primary_position(result: &SarifResult) -> Option<(&str, u64)> {
    let physical = result.locations.first()?.physical_location.as_ref()?;
    let uri = physical
        .artifact_location
        .as_ref()
        .and_then(|artifact| artifact.uri.as_deref())
        .filter(|uri| !uri.is_empty())?;
    let line = physical.region.as_ref()?.start_line?;
    let line = u64::try_from(line).ok().filter(|line| *line > 0)?;
    Some((uri, line))
}

fn comment_body(result: &SarifResult) -> String {
    let level = result.level.unwrap_or(SarifLevel::Warning);
    let rule_id = non_empty(result.rule_id.as_deref());
    let message = result
        .message
        .as_ref()
        .and_then(|message| {
            non_empty(message.markdown.as_deref()).or(non_empty(message.text.as_deref()))
        })
        .or(rule_id)
        .unwrap_or("Issue");
    match rule_id {
        Some(rule_id) => format!("Security finding ({level}) [{rule_id}]:\n\n{message}"),
        None => format!("Security finding ({level}):\n\n{message}"),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}
