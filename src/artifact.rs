use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{SecondsFormat, TimeDelta, Utc};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::github::{USER_AGENT, ensure_success};
use crate::outcome::StepOutcome;

pub(crate) const DEFAULT_ARTIFACT_NAME: &str = "security-review-sarif";
pub(crate) const DEFAULT_RETENTION_DAYS: u32 = 7;

const ARTIFACT_SERVICE: &str = "github.actions.results.api.v1.ArtifactService";
const RESULTS_SCOPE_PREFIX: &str = "Actions.Results:";

/// What the storage backend reported for an uploaded artifact.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct ArtifactUpload {
    pub(crate) id: Option<i64>,
    pub(crate) size: Option<u64>,
}

/// Retention-bounded storage for build artifacts.
pub(crate) trait ArtifactStore {
    /// Stores `files` (relative to `root_dir`) under `name`.
    fn upload(
        &self,
        name: &str,
        files: &[PathBuf],
        root_dir: &Path,
        retention_days: u32,
    ) -> Result<ArtifactUpload>;
}

/// Stands in when the runner exposes no artifact service; every upload fails
/// with the reason the real client could not be built.
pub(crate) struct UnavailableArtifactStore {
    reason: String,
}

impl UnavailableArtifactStore {
    pub(crate) fn new(err: &anyhow::Error) -> Self {
        Self {
            reason: format!("{err:#}"),
        }
    }
}

impl ArtifactStore for UnavailableArtifactStore {
    fn upload(&self, _: &str, _: &[PathBuf], _: &Path, _: u32) -> Result<ArtifactUpload> {
        anyhow::bail!("artifact service unavailable: {}", self.reason)
    }
}

/// Keeps the raw SARIF file as a workflow artifact.
pub(crate) fn publish_sarif_artifact(
    store: &dyn ArtifactStore,
    sarif_path: &Path,
    artifact_name: &str,
    retention_days: u32,
) -> StepOutcome {
    if sarif_path.as_os_str().is_empty() {
        warn!("artifact upload requested without a SARIF path");
        return StepOutcome::skipped("no SARIF path");
    }
    if !sarif_path.is_file() {
        warn!(
            "SARIF file does not exist, skipping artifact upload: {}",
            sarif_path.display()
        );
        return StepOutcome::skipped("SARIF file not found");
    }
    let Some(file_name) = sarif_path.file_name() else {
        return StepOutcome::skipped("SARIF path has no file name");
    };
    let root_dir = sarif_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let files = vec![PathBuf::from(file_name)];

    let upload = match store
        .upload(artifact_name, &files, root_dir, retention_days)
        .context("failed to upload SARIF as artifact")
    {
        Ok(upload) => upload,
        Err(err) => return StepOutcome::failed(&err),
    };
    let size = upload.size.unwrap_or(0);
    match upload.id {
        Some(id) => {
            info!("uploaded artifact '{artifact_name}' (id={id}, size={size} bytes)");
            StepOutcome::succeeded(format!("id={id}, size={size} bytes"))
        }
        None if size > 0 => {
            info!("uploaded artifact '{artifact_name}' (size={size} bytes)");
            StepOutcome::succeeded(format!("size={size} bytes"))
        }
        None => {
            warn!(
                "artifact '{artifact_name}' upload completed but server did not return id/size"
            );
            StepOutcome::succeeded("no id/size returned")
        }
    }
}

/// Workflow run and job identifiers the results service keys artifacts by.
#[derive(Clone, Debug, PartialEq, Eq)]
struct BackendIds {
    workflow_run_backend_id: String,
    workflow_job_run_backend_id: String,
}

#[derive(Deserialize)]
struct RuntimeTokenClaims {
    #[serde(default)]
    scp: String,
}

/// Reads the backend ids from the `scp` claim of the runtime token.
fn backend_ids(runtime_token: &str) -> Result<BackendIds> {
    let payload = runtime_token
        .split('.')
        .nth(1)
        .context("runtime token is not a JWT")?;
    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .context("failed to decode runtime token payload")?;
    let claims: RuntimeTokenClaims =
        serde_json::from_slice(&decoded).context("failed to parse runtime token claims")?;
    for scope in claims.scp.split(' ') {
        let Some(ids) = scope.strip_prefix(RESULTS_SCOPE_PREFIX) else {
            continue;
        };
        let Some((run, job)) = ids.split_once(':') else {
            anyhow::bail!("malformed results scope in runtime token: {scope}");
        };
        return Ok(BackendIds {
            workflow_run_backend_id: run.to_string(),
            workflow_job_run_backend_id: job.to_string(),
        });
    }
    anyhow::bail!("runtime token has no results scope")
}

#[derive(Serialize)]
struct CreateArtifactRequest<'a> {
    workflow_run_backend_id: &'a str,
    workflow_job_run_backend_id: &'a str,
    name: &'a str,
    version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<String>,
}

#[derive(Deserialize)]
struct CreateArtifactResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default, alias = "signedUploadUrl")]
    signed_upload_url: String,
}

#[derive(Serialize)]
struct FinalizeArtifactRequest<'a> {
    workflow_run_backend_id: &'a str,
    workflow_job_run_backend_id: &'a str,
    name: &'a str,
    size: String,
    hash: String,
}

#[derive(Deserialize)]
struct FinalizeArtifactResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default, alias = "artifactId")]
    artifact_id: Option<serde_json::Value>,
}

/// Client for the Actions results service artifact API (v4 artifacts).
pub(crate) struct ActionsArtifactClient {
    http: Client,
    results_url: String,
    runtime_token: String,
    backend: BackendIds,
}

impl ActionsArtifactClient {
    pub(crate) fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());
        let runtime_token = get("ACTIONS_RUNTIME_TOKEN")
            .context("ACTIONS_RUNTIME_TOKEN is not set; artifact storage is unavailable")?;
        let results_url = get("ACTIONS_RESULTS_URL")
            .context("ACTIONS_RESULTS_URL is not set; artifact storage is unavailable")?;
        let backend = backend_ids(&runtime_token)?;
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            results_url: results_url.trim_end_matches('/').to_string(),
            runtime_token,
            backend,
        })
    }

    fn twirp<B: Serialize, T: DeserializeOwned>(&self, method: &str, body: &B) -> Result<T> {
        let url = format!("{}/twirp/{ARTIFACT_SERVICE}/{method}", self.results_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.runtime_token)
            .json(body)
            .send()
            .with_context(|| format!("failed to call {method}"))?;
        let response = ensure_success(response, &url)?;
        response
            .json()
            .with_context(|| format!("failed to decode {method} response"))
    }
}

impl ArtifactStore for ActionsArtifactClient {
    fn upload(
        &self,
        name: &str,
        files: &[PathBuf],
        root_dir: &Path,
        retention_days: u32,
    ) -> Result<ArtifactUpload> {
        let archive = zip_files(files, root_dir)?;
        let expires_at = expiry_timestamp(retention_days)?;
        let created: CreateArtifactResponse = self.twirp(
            "CreateArtifact",
            &CreateArtifactRequest {
                workflow_run_backend_id: &self.backend.workflow_run_backend_id,
                workflow_job_run_backend_id: &self.backend.workflow_job_run_backend_id,
                name,
                version: 4,
                expires_at,
            },
        )?;
        if !created.ok || created.signed_upload_url.is_empty() {
            anyhow::bail!("CreateArtifact: response from backend was not ok");
        }

        let size = archive.len() as u64;
        let hash = format!("sha256:{}", hex::encode(Sha256::digest(&archive)));
        let response = self
            .http
            .put(&created.signed_upload_url)
            .header("x-ms-blob-type", "BlockBlob")
            .header(CONTENT_TYPE, "zip")
            .body(archive)
            .send()
            .context("failed to upload artifact archive")?;
        ensure_success(response, "artifact blob storage")?;

        let finalized: FinalizeArtifactResponse = self.twirp(
            "FinalizeArtifact",
            &FinalizeArtifactRequest {
                workflow_run_backend_id: &self.backend.workflow_run_backend_id,
                workflow_job_run_backend_id: &self.backend.workflow_job_run_backend_id,
                name,
                size: size.to_string(),
                hash,
            },
        )?;
        if !finalized.ok {
            anyhow::bail!("FinalizeArtifact: response from backend was not ok");
        }
        // int64 fields arrive as JSON strings
        let id = match finalized.artifact_id {
            Some(serde_json::Value::String(id)) => Some(
                id.parse::<i64>()
                    .context("invalid artifact id in FinalizeArtifact response")?,
            ),
            Some(serde_json::Value::Number(id)) => id.as_i64(),
            _ => None,
        };
        Ok(ArtifactUpload {
            id,
            size: Some(size),
        })
    }
}

fn expiry_timestamp(retention_days: u32) -> Result<Option<String>> {
    if retention_days == 0 {
        return Ok(None);
    }
    let retention = TimeDelta::try_days(i64::from(retention_days))
        .context("retention period out of range")?;
    Ok(Some(
        (Utc::now() + retention).to_rfc3339_opts(SecondsFormat::Secs, true),
    ))
}

/// Packs `files` into an in-memory zip, keyed by their path relative to `root_dir`.
fn zip_files(files: &[PathBuf], root_dir: &Path) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for file in files {
        let source = root_dir.join(file);
        let content = fs::read(&source)
            .with_context(|| format!("failed to read {}", source.display()))?;
        let entry_name = file
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        writer
            .start_file(entry_name, options)
            .context("failed to start zip entry")?;
        writer
            .write_all(&content)
            .context("failed to write zip entry")?;
    }
    let cursor = writer.finish().context("failed to finish zip archive")?;
    Ok(cursor.into_inner())
}
