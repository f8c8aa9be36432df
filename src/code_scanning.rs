use std::fs;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use tracing::{info, warn};

use crate::github::{ActionContext, CodeScanningApi};
use crate::outcome::StepOutcome;

/// Body of a code scanning SARIF upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub(crate) struct SarifUpload {
    pub(crate) commit_sha: String,
    #[serde(rename = "ref")]
    pub(crate) git_ref: String,
    pub(crate) sarif: String,
}

/// Acknowledgement returned by the ingestion endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SarifUploadReceipt {
    pub(crate) status: u16,
    pub(crate) id: Option<String>,
}

/// Gzips `raw` and encodes it as standard padded base64.
pub(crate) fn encode_sarif(raw: &[u8]) -> Result<String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(raw).context("failed to gzip SARIF")?;
    let compressed = encoder.finish().context("failed to gzip SARIF")?;
    Ok(STANDARD.encode(compressed))
}

/// Sends the SARIF file, verbatim, to code scanning for the current commit.
pub(crate) fn upload_to_code_scanning(
    api: &dyn CodeScanningApi,
    context: &ActionContext,
    sarif_path: &Path,
) -> StepOutcome {
    let raw = match fs::read(sarif_path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            warn!("SARIF file not found for upload: {}", sarif_path.display());
            return StepOutcome::skipped("SARIF file not found");
        }
        Err(err) => {
            let err = anyhow::Error::new(err)
                .context(format!("failed to read {}", sarif_path.display()));
            return StepOutcome::failed(&err);
        }
    };
    match upload(api, context, &raw) {
        Ok(receipt) => {
            let detail = match receipt.id.as_deref() {
                Some(id) => format!("status: {}, id: {id}", receipt.status),
                None => format!("status: {}", receipt.status),
            };
            info!("SARIF upload accepted. {detail}");
            StepOutcome::succeeded(detail)
        }
        Err(err) => StepOutcome::failed(&err.context("failed to upload SARIF to code scanning")),
    }
}

fn upload(
    api: &dyn CodeScanningApi,
    context: &ActionContext,
    raw: &[u8],
) -> Result<SarifUploadReceipt> {
    let repo = context.require_repository()?;
    let commit_sha = context.sha.clone().context("GITHUB_SHA is not set")?;
    let git_ref = context.git_ref.clone().context("GITHUB_REF is not set")?;
    let upload = SarifUpload {
        commit_sha,
        git_ref,
        sarif: encode_sarif(raw)?,
    };
    info!("uploading SARIF to GitHub code scanning...");
    api.upload_sarif(repo, &upload)
}
