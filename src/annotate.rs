use std::fs;
use std::io;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use tracing::{info, warn};

use crate::github::{ActionContext, PullRequestApi};
use crate::outcome::StepOutcome;
use crate::sarif::{PrComment, build_pr_comments, parse_sarif};

/// Review submitted to a pull request: comments only, no approval state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub(crate) struct ReviewRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) commit_id: Option<String>,
    pub(crate) event: ReviewEvent,
    pub(crate) comments: Vec<PrComment>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub(crate) enum ReviewEvent {
    #[serde(rename = "COMMENT")]
    Comment,
}

/// Posts SARIF findings as inline review comments on the triggering pull request.
pub(crate) fn annotate_pull_request(
    api: &dyn PullRequestApi,
    context: &ActionContext,
    sarif_path: &Path,
    max_comments: usize,
) -> StepOutcome {
    let Some(pull_request) = context.pull_request.as_ref() else {
        info!("not a pull_request event; skipping PR annotations");
        return StepOutcome::skipped("not a pull_request event");
    };
    let repo = match context.require_repository() {
        Ok(repo) => repo,
        Err(err) => return StepOutcome::failed(&err),
    };

    let raw = match fs::read_to_string(sarif_path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            warn!(
                "SARIF file not found for PR annotations: {}",
                sarif_path.display()
            );
            return StepOutcome::skipped("SARIF file not found");
        }
        Err(err) => {
            let err = anyhow::Error::new(err)
                .context(format!("failed to read {}", sarif_path.display()));
            return StepOutcome::failed(&err);
        }
    };
    let Some(log) = parse_sarif(&raw) else {
        return StepOutcome::skipped("SARIF file could not be parsed");
    };
    for run in &log.runs {
        info!(
            "{} result(s) reported by {}",
            run.results.len(),
            run.driver_name().unwrap_or("unknown tool")
        );
    }

    let comments = build_pr_comments(&log, max_comments);
    if comments.is_empty() {
        info!("no SARIF results to annotate on the PR");
        return StepOutcome::skipped("no SARIF results to annotate");
    }

    let count = comments.len();
    info!("creating PR review with {count} comment(s) from SARIF findings...");
    let review = ReviewRequest {
        commit_id: pull_request.head_sha.clone(),
        event: ReviewEvent::Comment,
        comments,
    };
    match api
        .create_review(repo, pull_request.number, &review)
        .with_context(|| format!("failed to create PR review on #{}", pull_request.number))
    {
        Ok(()) => {
            info!("PR review created successfully with SARIF annotations");
            StepOutcome::succeeded(format!(
                "{count} comment(s) on #{}",
                pull_request.number
            ))
        }
        Err(err) => StepOutcome::failed(&err),
    }
}
