use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use opentelemetry::KeyValue;
use tracing::{info, warn};

use crate::annotate::annotate_pull_request;
use crate::artifact::{
    ActionsArtifactClient, ArtifactStore, UnavailableArtifactStore, publish_sarif_artifact,
};
use crate::code_scanning::upload_to_code_scanning;
use crate::config::{ActionConfig, BinarySource};
use crate::github::{ActionContext, CodeScanningApi, GitHubClient, PullRequestApi, RepoRef};
use crate::outcome::{RunSummary, StepOutcome};
use crate::release::{DEFAULT_RELEASE_REPOSITORY, acquire_from_release};
use crate::runner::{SystemProperty, ToolInvocation, ToolRunner};
use crate::telemetry::{Telemetry, with_span};

pub(crate) const SARIF_FILE_NAME: &str = "security-review.sarif";
pub(crate) const SARIF_OUTPUT: &str = "sarif-file";
const TOKEN_PROPERTY: &str = "JBAI_TOKEN";
const ENVIRONMENT_PROPERTY: &str = "JBAI_ENVIRONMENT";

/// How the analysis jar is obtained before the run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum BinaryResolution {
    Bundled(PathBuf),
    LatestRelease {
        repository: RepoRef,
        download_dir: PathBuf,
    },
}

impl BinaryResolution {
    pub(crate) fn from_config(config: &ActionConfig, context: &ActionContext) -> Result<Self> {
        match config.binary_source {
            BinarySource::Bundled => Ok(Self::Bundled(config.tool_path.clone())),
            BinarySource::Release => {
                let repository = config
                    .release_repository
                    .as_deref()
                    .or(context.action_repository.as_deref())
                    .unwrap_or(DEFAULT_RELEASE_REPOSITORY);
                let download_dir = context
                    .runner_temp
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(".tmp"));
                Ok(Self::LatestRelease {
                    repository: RepoRef::parse(repository)?,
                    download_dir,
                })
            }
        }
    }

    fn resolve(&self, context: &ActionContext, github_token: Option<&str>) -> Result<PathBuf> {
        match self {
            Self::Bundled(path) => {
                if !path.is_file() {
                    anyhow::bail!("analysis jar not found at {}", path.display());
                }
                Ok(path.clone())
            }
            Self::LatestRelease {
                repository,
                download_dir,
            } => {
                let client = GitHubClient::new(&context.api_url, github_token)?;
                acquire_from_release(&client, repository, download_dir)
                    .context("failed to acquire analysis.jar from release")
            }
        }
    }
}

/// Platform services the SARIF file is distributed to.
pub(crate) struct Integrations {
    pub(crate) pull_requests: Box<dyn PullRequestApi>,
    pub(crate) code_scanning: Box<dyn CodeScanningApi>,
    pub(crate) artifacts: Box<dyn ArtifactStore>,
}

impl Integrations {
    /// Connects to GitHub with `github_token` and to the runner's artifact storage.
    pub(crate) fn connect(context: &ActionContext, github_token: &str) -> Result<Self> {
        let client = GitHubClient::new(&context.api_url, Some(github_token))?;
        let artifacts: Box<dyn ArtifactStore> = match ActionsArtifactClient::from_env() {
            Ok(store) => Box::new(store),
            Err(err) => Box::new(UnavailableArtifactStore::new(&err)),
        };
        Ok(Self {
            pull_requests: Box::new(client.clone()),
            code_scanning: Box::new(client),
            artifacts,
        })
    }
}

/// Drives one run: binary resolution, analysis, and SARIF distribution.
pub(crate) struct Orchestrator<'a> {
    config: &'a ActionConfig,
    context: &'a ActionContext,
    runner: &'a dyn ToolRunner,
    telemetry: Option<&'a Telemetry>,
}

impl<'a> Orchestrator<'a> {
    pub(crate) fn new(
        config: &'a ActionConfig,
        context: &'a ActionContext,
        runner: &'a dyn ToolRunner,
        telemetry: Option<&'a Telemetry>,
    ) -> Self {
        Self {
            config,
            context,
            runner,
            telemetry,
        }
    }

    /// Runs the analysis and distributes its SARIF output.
    ///
    /// Errors are fatal to the run; distribution problems are reported in the
    /// returned summary instead.
    pub(crate) fn run<C>(&self, connect: C) -> Result<RunSummary>
    where
        C: FnOnce(&str) -> Result<Integrations>,
    {
        let token = self
            .config
            .jbai_token
            .as_deref()
            .context("jbai-token is required")?;
        self.context.mask_secret(token);

        let resolution = BinaryResolution::from_config(self.config, self.context)?;
        let jar = with_span(
            self.telemetry,
            "resolve",
            &[KeyValue::new("security_review.phase", "resolve")],
            || resolution.resolve(self.context, self.config.github_token.as_deref()),
        )?;

        let invocation = build_invocation(self.config, token, jar);
        info!("running static security analysis...");
        info!("Command: {invocation}");
        with_span(
            self.telemetry,
            "analysis",
            &[KeyValue::new("security_review.phase", "analysis")],
            || self.runner.run(&invocation),
        )
        .context("security analysis failed")?;

        let sarif_path = self.config.result_path.join(SARIF_FILE_NAME);
        if !sarif_path.is_file() {
            warn!("SARIF file not found at expected location");
            anyhow::bail!(
                "Expected SARIF file was not generated: {}",
                sarif_path.display()
            );
        }
        info!("SARIF file created successfully: {}", sarif_path.display());
        if let Err(err) = self
            .context
            .set_output(SARIF_OUTPUT, &sarif_path.display().to_string())
        {
            warn!("failed to publish {SARIF_OUTPUT} output: {err:#}");
        }

        let summary = match self.config.github_token.as_deref() {
            Some(github_token) => match connect(github_token) {
                Ok(integrations) => self.distribute(&integrations, &sarif_path),
                Err(err) => integrations_unavailable(err),
            },
            None => {
                info!(
                    "github-token not provided; skipping PR annotations, SARIF upload and artifact"
                );
                RunSummary::default()
            }
        };
        summary.log();
        Ok(summary)
    }

    fn distribute(&self, integrations: &Integrations, sarif_path: &Path) -> RunSummary {
        let mut summary = RunSummary::default();
        let outcome = with_span(
            self.telemetry,
            "annotate",
            &[KeyValue::new("security_review.phase", "annotate")],
            || {
                annotate_pull_request(
                    integrations.pull_requests.as_ref(),
                    self.context,
                    sarif_path,
                    self.config.max_comments,
                )
            },
        );
        summary.record("annotate", outcome);
        let outcome = with_span(
            self.telemetry,
            "code_scanning",
            &[KeyValue::new("security_review.phase", "code_scanning")],
            || {
                upload_to_code_scanning(
                    integrations.code_scanning.as_ref(),
                    self.context,
                    sarif_path,
                )
            },
        );
        summary.record("code_scanning", outcome);
        let outcome = with_span(
            self.telemetry,
            "artifact",
            &[KeyValue::new("security_review.phase", "artifact")],
            || {
                publish_sarif_artifact(
                    integrations.artifacts.as_ref(),
                    sarif_path,
                    &self.config.artifact_name,
                    self.config.retention_days,
                )
            },
        );
        summary.record("artifact", outcome);
        summary
    }
}

fn integrations_unavailable(err: anyhow::Error) -> RunSummary {
    let err = err.context("failed to set up GitHub integrations");
    let mut summary = RunSummary::default();
    for step in ["annotate", "code_scanning", "artifact"] {
        summary.record(step, StepOutcome::failed(&err));
    }
    summary
}

/// Builds the analyzer command line from the run configuration.
pub(crate) fn build_invocation(config: &ActionConfig, token: &str, jar: PathBuf) -> ToolInvocation {
    let mut tool_args = vec![
        format!("--repo={}", config.repo_path),
        format!("--result={}", config.result_path.display()),
        format!("--temperature={}", config.temperature),
        "--shouldProduceSarif=true".to_string(),
    ];
    let optional = [
        ("model", &config.model),
        ("prompt", &config.prompt),
        ("authType", &config.auth_type),
        ("branch", &config.branch),
    ];
    for (flag, value) in optional {
        if let Some(value) = value {
            tool_args.push(format!("--{flag}={value}"));
        }
    }
    ToolInvocation {
        runtime: config.runtime.clone(),
        properties: vec![
            SystemProperty::secret(TOKEN_PROPERTY, token),
            SystemProperty::plain(ENVIRONMENT_PROPERTY, &config.jbai_environment),
        ],
        jar,
        tool_args,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs;
    use std::rc::Rc;

    use tempfile::{TempDir, tempdir};

    use crate::annotate::ReviewRequest;
    use crate::artifact::ArtifactUpload;
    use crate::code_scanning::{SarifUpload, SarifUploadReceipt};
    use crate::config::Inputs;
    use crate::github::context::PullRequestContext;
    use crate::sarif::tests::{located_result, sarif_document};

    type CallLog = Rc<RefCell<Vec<&'static str>>>;

    struct FakeRunner {
        sarif: Option<String>,
        exit_ok: bool,
        invocations: RefCell<Vec<ToolInvocation>>,
    }

    impl FakeRunner {
        fn producing(sarif: Option<String>) -> Self {
            Self {
                sarif,
                exit_ok: true,
                invocations: RefCell::new(Vec::new()),
            }
        }
    }

    impl ToolRunner for FakeRunner {
        fn run(&self, invocation: &ToolInvocation) -> Result<()> {
            self.invocations.borrow_mut().push(invocation.clone());
            if !self.exit_ok {
                anyhow::bail!("analysis process exited with exit status: 1");
            }
            let result_dir = invocation
                .tool_args
                .iter()
                .find_map(|arg| arg.strip_prefix("--result="))
                .expect("result arg");
            if let Some(sarif) = &self.sarif {
                fs::write(Path::new(result_dir).join(SARIF_FILE_NAME), sarif)
                    .expect("write SARIF");
            }
            Ok(())
        }
    }

    struct FakeReviews(CallLog);

    impl PullRequestApi for FakeReviews {
        fn create_review(&self, _: &RepoRef, _: u64, _: &ReviewRequest) -> Result<()> {
            self.0.borrow_mut().push("annotate");
            Ok(())
        }
    }

    struct FailingScanning(CallLog);

    impl CodeScanningApi for FailingScanning {
        fn upload_sarif(&self, _: &RepoRef, _: &SarifUpload) -> Result<SarifUploadReceipt> {
            self.0.borrow_mut().push("code_scanning");
            anyhow::bail!("HTTP 403 Forbidden")
        }
    }

    struct FakeArtifacts(CallLog);

    impl ArtifactStore for FakeArtifacts {
        fn upload(&self, _: &str, _: &[PathBuf], _: &Path, _: u32) -> Result<ArtifactUpload> {
            self.0.borrow_mut().push("artifact");
            Ok(ArtifactUpload {
                id: Some(1),
                size: Some(10),
            })
        }
    }

    struct Workspace {
        dir: TempDir,
        config: ActionConfig,
    }

    fn workspace(jbai_token: Option<&str>, github_token: Option<&str>) -> Workspace {
        let dir = tempdir().expect("temp dir");
        let jar = dir.path().join("tool/analysis.jar");
        fs::create_dir_all(jar.parent().expect("jar dir")).expect("create tool dir");
        fs::write(&jar, b"PK").expect("write jar");
        let result_dir = dir.path().join("out");
        fs::create_dir_all(&result_dir).expect("create result dir");
        let config = Inputs {
            jbai_token: jbai_token.map(str::to_string),
            github_token: github_token.map(str::to_string),
            result_path: Some(result_dir.display().to_string()),
            tool_path: Some(jar.display().to_string()),
            ..Inputs::default()
        }
        .resolve()
        .expect("resolve config");
        Workspace { dir, config }
    }

    fn output_context(workspace: &Workspace) -> ActionContext {
        ActionContext {
            output_file: Some(workspace.dir.path().join("github_output")),
            ..ActionContext::default()
        }
    }

    fn no_integrations(_: &str) -> Result<Integrations> {
        panic!("integrations must not be connected without a github token")
    }

    #[test]
    fn missing_token_fails_before_running() {
        let workspace = workspace(None, None);
        let context = output_context(&workspace);
        let runner = FakeRunner::producing(Some("{}".to_string()));

        let err = Orchestrator::new(&workspace.config, &context, &runner, None)
            .run(no_integrations)
            .expect_err("missing token");

        assert_eq!(err.to_string(), "jbai-token is required");
        assert!(runner.invocations.borrow().is_empty());
    }

    #[test]
    fn publishes_output_and_skips_distribution_without_github_token() {
        let workspace = workspace(Some("secret"), None);
        let context = output_context(&workspace);
        let runner = FakeRunner::producing(Some("{}".to_string()));

        let summary = Orchestrator::new(&workspace.config, &context, &runner, None)
            .run(no_integrations)
            .expect("run");

        assert!(summary.steps.is_empty());
        let sarif_path = workspace.config.result_path.join(SARIF_FILE_NAME);
        let output = fs::read_to_string(workspace.dir.path().join("github_output"))
            .expect("read output");
        assert_eq!(output, format!("sarif-file={}\n", sarif_path.display()));
    }

    #[test]
    fn missing_sarif_output_is_fatal() {
        let workspace = workspace(Some("secret"), None);
        let context = output_context(&workspace);
        let runner = FakeRunner::producing(None);

        let err = Orchestrator::new(&workspace.config, &context, &runner, None)
            .run(no_integrations)
            .expect_err("missing SARIF");

        assert!(err.to_string().contains("Expected SARIF file was not generated"));
    }

    #[test]
    fn failed_analysis_is_fatal() {
        let workspace = workspace(Some("secret"), None);
        let context = output_context(&workspace);
        let runner = FakeRunner {
            exit_ok: false,
            ..FakeRunner::producing(Some("{}".to_string()))
        };

        let err = Orchestrator::new(&workspace.config, &context, &runner, None)
            .run(no_integrations)
            .expect_err("analysis failure");

        assert!(format!("{err:#}").contains("security analysis failed"));
    }

    #[test]
    fn missing_bundled_jar_is_fatal() {
        let mut workspace = workspace(Some("secret"), None);
        workspace.config.tool_path = workspace.dir.path().join("nope.jar");
        let context = output_context(&workspace);
        let runner = FakeRunner::producing(Some("{}".to_string()));

        let err = Orchestrator::new(&workspace.config, &context, &runner, None)
            .run(no_integrations)
            .expect_err("missing jar");

        assert!(err.to_string().contains("analysis jar not found"));
        assert!(runner.invocations.borrow().is_empty());
    }

    #[test]
    fn distribution_failures_do_not_fail_the_run() {
        let workspace = workspace(Some("secret"), Some("gh-token"));
        let context = ActionContext {
            repository: Some(RepoRef::parse("octo/widgets").expect("repo")),
            sha: Some("abc".to_string()),
            git_ref: Some("refs/pull/3/merge".to_string()),
            pull_request: Some(PullRequestContext {
                number: 3,
                head_sha: None,
            }),
            ..output_context(&workspace)
        };
        let runner = FakeRunner::producing(Some(sarif_document(vec![vec![located_result(
            "src/a.ts", 10, "SQL injection",
        )]])));
        let calls: CallLog = Rc::default();

        let summary = Orchestrator::new(&workspace.config, &context, &runner, None)
            .run(|token| {
                assert_eq!(token, "gh-token");
                Ok(Integrations {
                    pull_requests: Box::new(FakeReviews(calls.clone())),
                    code_scanning: Box::new(FailingScanning(calls.clone())),
                    artifacts: Box::new(FakeArtifacts(calls.clone())),
                })
            })
            .expect("run succeeds");

        assert_eq!(*calls.borrow(), vec!["annotate", "code_scanning", "artifact"]);
        let failed: Vec<&str> = summary.failed_steps().map(|report| report.step).collect();
        assert_eq!(failed, vec!["code_scanning"]);
        assert_eq!(
            summary.outcome_of("artifact"),
            Some(&StepOutcome::succeeded("id=1, size=10 bytes"))
        );
    }

    #[test]
    fn integration_setup_failure_is_recoverable() {
        let workspace = workspace(Some("secret"), Some("gh-token"));
        let context = output_context(&workspace);
        let runner = FakeRunner::producing(Some("{}".to_string()));

        let summary = Orchestrator::new(&workspace.config, &context, &runner, None)
            .run(|_| Err(anyhow::anyhow!("TLS backend unavailable")))
            .expect("run succeeds");

        assert_eq!(summary.failed_steps().count(), 3);
    }

    #[test]
    fn invocation_includes_only_provided_options() {
        let mut workspace = workspace(Some("secret"), None);
        workspace.config.model = Some("gpt-4o".to_string());
        workspace.config.branch = Some("main".to_string());

        let invocation = build_invocation(&workspace.config, "secret", PathBuf::from("a.jar"));

        let result = workspace.config.result_path.display().to_string();
        assert_eq!(
            invocation.args(),
            vec![
                "-DJBAI_ENVIRONMENT=staging".to_string(),
                "-jar".to_string(),
                "a.jar".to_string(),
                "--repo=.".to_string(),
                format!("--result={result}"),
                "--temperature=0.0".to_string(),
                "--shouldProduceSarif=true".to_string(),
                "--model=gpt-4o".to_string(),
                "--branch=main".to_string(),
            ]
        );
        assert!(!invocation.to_string().contains("secret"));
        assert!(invocation.env().any(|entry| entry == ("JBAI_TOKEN", "secret")));
    }

    #[test]
    fn release_resolution_defaults_to_action_repository() {
        let workspace = workspace(Some("secret"), None);
        let mut config = workspace.config.clone();
        config.binary_source = BinarySource::Release;
        let context = ActionContext {
            action_repository: Some("octo/sec-review-action".to_string()),
            runner_temp: Some(PathBuf::from("/runner/_temp")),
            ..ActionContext::default()
        };

        let resolution = BinaryResolution::from_config(&config, &context).expect("resolution");

        assert_eq!(
            resolution,
            BinaryResolution::LatestRelease {
                repository: RepoRef::parse("octo/sec-review-action").expect("repo"),
                download_dir: PathBuf::from("/runner/_temp"),
            }
        );

        let fallback = BinaryResolution::from_config(&config, &ActionContext::default())
            .expect("fallback resolution");
        assert_eq!(
            fallback,
            BinaryResolution::LatestRelease {
                repository: RepoRef::parse(DEFAULT_RELEASE_REPOSITORY).expect("repo"),
                download_dir: PathBuf::from(".tmp"),
            }
        );
    }
}
