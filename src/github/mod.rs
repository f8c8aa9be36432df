pub(crate) mod context;

use anyhow::{Context, Result};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::ACCEPT;
use reqwest::redirect::Policy;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::annotate::ReviewRequest;
use crate::code_scanning::{SarifUpload, SarifUploadReceipt};
use crate::release::Release;

pub(crate) use context::{ActionContext, RepoRef};

pub(crate) const USER_AGENT: &str = "sec-review-action";
const API_VERSION: &str = "2022-11-28";
const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";

/// Release lookups used to acquire the analysis binary.
pub(crate) trait ReleaseApi {
    fn latest_release(&self, repo: &RepoRef) -> Result<Release>;
    fn list_releases(&self, repo: &RepoRef, per_page: u32) -> Result<Vec<Release>>;
}

/// Pull request review submission.
pub(crate) trait PullRequestApi {
    fn create_review(&self, repo: &RepoRef, pull_number: u64, review: &ReviewRequest)
    -> Result<()>;
}

/// Code scanning SARIF ingestion.
pub(crate) trait CodeScanningApi {
    fn upload_sarif(&self, repo: &RepoRef, upload: &SarifUpload) -> Result<SarifUploadReceipt>;
}

/// Blocking GitHub REST client.
#[derive(Clone)]
pub(crate) struct GitHubClient {
    http: Client,
    api_url: String,
    token: Option<String>,
}

impl GitHubClient {
    pub(crate) fn new(api_url: &str, token: Option<&str>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(Policy::limited(10))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.map(str::to_string),
        })
    }

    /// Prepares a GET for a binary payload, following redirects.
    pub(crate) fn download(&self, url: &str) -> RequestBuilder {
        self.authorize(self.http.get(url))
            .header(ACCEPT, "application/octet-stream")
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn api_request(&self, request: RequestBuilder) -> RequestBuilder {
        self.authorize(request)
            .header(ACCEPT, JSON_MEDIA_TYPE)
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path);
        let response = self
            .api_request(self.http.get(&url))
            .send()
            .with_context(|| format!("failed to fetch {url}"))?;
        let response = ensure_success(response, &url)?;
        response
            .json()
            .with_context(|| format!("failed to decode response from {url}"))
    }

    fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<Response> {
        let url = self.endpoint(path);
        let response = self
            .api_request(self.http.post(&url))
            .json(body)
            .send()
            .with_context(|| format!("failed to post {url}"))?;
        ensure_success(response, &url)
    }
}

/// Turns a non-2xx response into an error carrying the response body.
pub(crate) fn ensure_success(response: Response, url: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    let body = body.trim();
    if body.is_empty() {
        anyhow::bail!("HTTP {status} from {url}");
    }
    anyhow::bail!("HTTP {status} from {url}: {}", truncate(body, 512))
}

fn truncate(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((index, _)) => &value[..index],
        None => value,
    }
}

impl ReleaseApi for GitHubClient {
    fn latest_release(&self, repo: &RepoRef) -> Result<Release> {
        self.get_json(&format!(
            "/repos/{}/{}/releases/latest",
            repo.owner, repo.name
        ))
    }

    fn list_releases(&self, repo: &RepoRef, per_page: u32) -> Result<Vec<Release>> {
        self.get_json(&format!(
            "/repos/{}/{}/releases?per_page={per_page}",
            repo.owner, repo.name
        ))
    }
}

impl PullRequestApi for GitHubClient {
    fn create_review(
        &self,
        repo: &RepoRef,
        pull_number: u64,
        review: &ReviewRequest,
    ) -> Result<()> {
        self.post_json(
            &format!(
                "/repos/{}/{}/pulls/{pull_number}/reviews",
                repo.owner, repo.name
            ),
            review,
        )?;
        Ok(())
    }
}

impl CodeScanningApi for GitHubClient {
    fn upload_sarif(&self, repo: &RepoRef, upload: &SarifUpload) -> Result<SarifUploadReceipt> {
        let response = self.post_json(
            &format!("/repos/{}/{}/code-scanning/sarifs", repo.owner, repo.name),
            upload,
        )?;
        let status = response.status().as_u16();
        let body: serde_json::Value = response.json().unwrap_or(serde_json::Value::Null);
        let id = body
            .get("id")
            .and_then(|id| id.as_str())
            .map(str::to_string);
        Ok(SarifUploadReceipt { status, id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slash() {
        let client = GitHubClient::new("https://ghe.example.com/api/v3/", None).expect("client");

        assert_eq!(
            client.endpoint("/repos/octo/widgets/releases/latest"),
            "https://ghe.example.com/api/v3/repos/octo/widgets/releases/latest"
        );
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("short", 10), "short");
    }
}
