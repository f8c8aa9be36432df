use std::fmt;

use tracing::{info, warn};

/// Result of a best-effort step that runs after the analysis succeeded.
///
/// None of these variants fail the run; `Failed` is only surfaced as a warning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum StepOutcome {
    Succeeded(String),
    Skipped(String),
    Failed(String),
}

impl StepOutcome {
    pub(crate) fn succeeded(detail: impl Into<String>) -> Self {
        Self::Succeeded(detail.into())
    }

    pub(crate) fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped(reason.into())
    }

    /// Records an error chain as a recoverable failure.
    pub(crate) fn failed(err: &anyhow::Error) -> Self {
        Self::Failed(format!("{err:#}"))
    }

    pub(crate) fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded(detail) => write!(f, "succeeded: {detail}"),
            Self::Skipped(reason) => write!(f, "skipped: {reason}"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Outcome of one named fan-out step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct StepReport {
    pub(crate) step: &'static str,
    pub(crate) outcome: StepOutcome,
}

/// Outcomes of every fan-out step of a run, in execution order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct RunSummary {
    pub(crate) steps: Vec<StepReport>,
}

impl RunSummary {
    pub(crate) fn record(&mut self, step: &'static str, outcome: StepOutcome) {
        self.steps.push(StepReport { step, outcome });
    }

    pub(crate) fn failed_steps(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|report| report.outcome.is_failed())
    }

    #[cfg(test)]
    pub(crate) fn outcome_of(&self, step: &str) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|report| report.step == step)
            .map(|report| &report.outcome)
    }

    pub(crate) fn log(&self) {
        for report in &self.steps {
            match &report.outcome {
                StepOutcome::Failed(_) => warn!("{}: {}", report.step, report.outcome),
                _ => info!("{}: {}", report.step, report.outcome),
            }
        }
        let failed = self.failed_steps().count();
        if failed > 0 {
            warn!("{failed} post-analysis step(s) failed; the analysis result is unaffected");
        }
    }
}
