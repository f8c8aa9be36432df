mod annotate;
mod artifact;
mod code_scanning;
mod config;
mod github;
mod orchestrator;
mod outcome;
mod release;
mod runner;
mod sarif;
mod telemetry;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use opentelemetry::KeyValue;
use tracing::error;

use crate::config::Inputs;
use crate::github::ActionContext;
use crate::orchestrator::{Integrations, Orchestrator};
use crate::runner::ProcessRunner;
use crate::telemetry::{Telemetry, init_logging, with_span};

/// CLI arguments for the security review action.
#[derive(Parser, Debug)]
#[command(
    name = "security-review-action",
    about = "Runs the AI security analyzer and publishes its SARIF findings to GitHub.",
    version
)]
struct Cli {
    #[command(flatten)]
    inputs: Inputs,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if std::env::var_os("GITHUB_ACTIONS").is_some() {
                println!("::error::Action failed with error: {err:#}");
            }
            eprintln!("{err:?}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = cli.inputs.resolve()?;
    let context = ActionContext::from_env();
    let telemetry = match &config.otel {
        Some(url) => Some(Telemetry::new(url)?),
        None => None,
    };
    let attributes = [
        KeyValue::new(
            "security_review.binary_source",
            config.binary_source.as_str(),
        ),
        KeyValue::new(
            "security_review.pull_request",
            context.pull_request.is_some(),
        ),
    ];
    let result = with_span(telemetry.as_ref(), "security-review", &attributes, || {
        Orchestrator::new(&config, &context, &ProcessRunner, telemetry.as_ref())
            .run(|token| Integrations::connect(&context, token))
            .map(|_| ())
    });
    if let Some(telemetry) = telemetry {
        if let Err(err) = telemetry.shutdown() {
            error!("{err:#}");
        }
    }
    result
}
