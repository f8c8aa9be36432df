use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::header::CONTENT_LENGTH;
use serde::Deserialize;
use tracing::{info, warn};

use crate::github::{GitHubClient, ReleaseApi, RepoRef, ensure_success};

pub(crate) const ASSET_NAME: &str = "analysis.jar";
pub(crate) const DEFAULT_RELEASE_REPOSITORY: &str = "hybloid/sec-review-action";
const ASSET_EXTENSION: &str = ".jar";
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);
const CHUNK_SIZE: usize = 64 * 1024;

/// Published release as returned by the releases API.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub(crate) struct Release {
    #[serde(default)]
    pub(crate) tag_name: Option<String>,
    #[serde(default)]
    pub(crate) assets: Vec<ReleaseAsset>,
}

/// Binary attached to a release.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub(crate) struct ReleaseAsset {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) browser_download_url: Option<String>,
    #[serde(default)]
    pub(crate) url: Option<String>,
}

impl ReleaseAsset {
    pub(crate) fn download_url(&self) -> Result<&str> {
        self.browser_download_url
            .as_deref()
            .or(self.url.as_deref())
            .filter(|url| !url.is_empty())
            .with_context(|| format!("asset download URL not found for {}", self.name))
    }
}

/// Finds the analysis binary on the most recent release of `repo`.
///
/// Falls back to the release listing when there is no release flagged as latest,
/// which also picks up prereleases.
pub(crate) fn resolve_latest_release_asset(
    api: &dyn ReleaseApi,
    repo: &RepoRef,
) -> Result<ReleaseAsset> {
    let release = match api.latest_release(repo) {
        Ok(release) => Some(release),
        Err(err) => {
            warn!("failed to fetch latest release (stable): {err:#}");
            api.list_releases(repo, 1)
                .with_context(|| format!("failed to list releases of {repo}"))?
                .into_iter()
                .next()
        }
    };
    let release = release.with_context(|| format!("no releases found for {repo}"))?;
    if let Some(tag) = release.tag_name.as_deref() {
        info!("using release {tag} of {repo}");
    }
    select_asset(&release.assets).cloned()
}

/// Prefers the exact asset name, then any jar.
pub(crate) fn select_asset(assets: &[ReleaseAsset]) -> Result<&ReleaseAsset> {
    assets
        .iter()
        .find(|asset| asset.name == ASSET_NAME)
        .or_else(|| {
            assets
                .iter()
                .find(|asset| asset.name.to_ascii_lowercase().ends_with(ASSET_EXTENSION))
        })
        .context("no matching asset in the latest release")
}

/// Resolves the analysis binary from `repo` and downloads it under `download_dir`.
pub(crate) fn acquire_from_release(
    client: &GitHubClient,
    repo: &RepoRef,
    download_dir: &Path,
) -> Result<PathBuf> {
    info!("resolving {ASSET_NAME} from latest release of {repo}...");
    let asset = resolve_latest_release_asset(client, repo)?;
    let url = asset.download_url()?;
    let destination = download_dir.join(ASSET_NAME);
    download_with_progress(client, url, &destination)?;
    Ok(destination)
}

/// Streams `url` into `destination`, logging progress at most once per second.
pub(crate) fn download_with_progress(
    client: &GitHubClient,
    url: &str,
    destination: &Path,
) -> Result<()> {
    let response = client
        .download(url)
        .send()
        .with_context(|| format!("failed to download asset from {url}"))?;
    let mut response =
        ensure_success(response, url).context("failed to download asset")?;
    let total = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|total| *total > 0);

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let file = File::create(destination)
        .with_context(|| format!("failed to create {}", destination.display()))?;
    let mut writer = BufWriter::new(file);

    let mut progress = ProgressThrottle::new(Instant::now(), total);
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = response
            .read(&mut buffer)
            .context("failed to read download stream")?;
        if read == 0 {
            break;
        }
        writer
            .write_all(&buffer[..read])
            .with_context(|| format!("failed to write {}", destination.display()))?;
        if let Some(line) = progress.advance(read as u64, Instant::now()) {
            info!("{line}");
        }
    }
    writer
        .flush()
        .with_context(|| format!("failed to write {}", destination.display()))?;
    info!("Download complete: {} bytes", progress.downloaded());

    let size = fs::metadata(destination).map(|meta| meta.len()).unwrap_or(0);
    if size == 0 {
        anyhow::bail!("downloaded {ASSET_NAME} is empty or missing");
    }
    Ok(())
}

/// Byte counter that renders a progress line at most once per interval.
struct ProgressThrottle {
    total: Option<u64>,
    downloaded: u64,
    last_logged: Instant,
}

impl ProgressThrottle {
    fn new(started_at: Instant, total: Option<u64>) -> Self {
        Self {
            total,
            downloaded: 0,
            last_logged: started_at,
        }
    }

    fn downloaded(&self) -> u64 {
        self.downloaded
    }

    fn advance(&mut self, bytes: u64, now: Instant) -> Option<String> {
        self.downloaded += bytes;
        if now.duration_since(self.last_logged) <= PROGRESS_INTERVAL {
            return None;
        }
        self.last_logged = now;
        Some(match self.total {
            Some(total) => {
                let percent = self.downloaded as f64 / total as f64 * 100.0;
                format!(
                    "Downloading {ASSET_NAME}: {percent:.1}% ({}/{total} bytes)",
                    self.downloaded
                )
            }
            None => format!("Downloading {ASSET_NAME}: {} bytes", self.downloaded),
        })
    }
}
