pub mod token;
pub mod webhook;

use std::time::Duration;

use anyhow::{Context, Result, bail};
use copycheck_core::models::{
    ChangedFile, CheckError, CheckRun, CommitFiles, CreatedCheckRun, Webhook,
};
use http::{StatusCode, header};

use crate::token::TokenSupplier;

const USER_AGENT: &str = concat!("copycheck/", env!("CARGO_PKG_VERSION"));
const ACCEPT_JSON: &str = "application/vnd.github.v3+json";
const ACCEPT_RAW: &str = "application/vnd.github.v3.raw";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds the shared HTTP client used for every outbound GitHub call.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Stateless calls against the GitHub REST and Checks APIs. Every endpoint
/// is a URL (or URL template) carried by the triggering webhook payload.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
}

impl GitHubClient {
    pub fn new(http: reqwest::Client) -> Self { Self { http } }

    /// Lists the files changed by a pull request, paging through
    /// `{base_url}/files?page=N` until a page comes back empty. A non-success
    /// status or unparsable page aborts the listing; partial results are
    /// discarded and the caller reports the failure as the run's summary.
    pub async fn get_files_changed(&self, token: &str, base_url: &str) -> Result<Vec<ChangedFile>> {
        let mut files = Vec::new();
        for page in 1u32.. {
            let url = format!("{base_url}/files?page={page}");
            let response = self
                .http
                .get(&url)
                .bearer_auth(token)
                .header(header::ACCEPT, ACCEPT_JSON)
                .send()
                .await
                .with_context(|| format!("Failed to fetch changed files page {page}"))?;
            let status = response.status();
            if !status.is_success() {
                bail!("Changed files listing returned {status} for page {page}");
            }
            let page_files: Vec<ChangedFile> = response
                .json()
                .await
                .with_context(|| format!("Failed to parse changed files page {page}"))?;
            if page_files.is_empty() {
                break;
            }
            files.extend(page_files);
        }
        Ok(files)
    }

    /// Lists the files changed by a commit range. The compare and
    /// single-commit endpoints wrap the list in an object, but pagination
    /// works the same way as for pull requests.
    pub async fn get_commit_files_changed(
        &self,
        token: &str,
        files_url: &str,
    ) -> Result<Vec<ChangedFile>> {
        let mut files = Vec::new();
        for page in 1u32.. {
            let url = format!("{files_url}?page={page}");
            let response = self
                .http
                .get(&url)
                .bearer_auth(token)
                .header(header::ACCEPT, ACCEPT_JSON)
                .send()
                .await
                .with_context(|| format!("Failed to fetch changed files page {page}"))?;
            let status = response.status();
            if !status.is_success() {
                bail!("Changed files listing returned {status} for page {page}");
            }
            let body: CommitFiles = response
                .json()
                .await
                .with_context(|| format!("Failed to parse changed files page {page}"))?;
            match body.files {
                Some(page_files) if !page_files.is_empty() => files.extend(page_files),
                _ => break,
            }
        }
        Ok(files)
    }

    /// Fetches the raw content of one changed file.
    pub async fn get_file_content(&self, token: &str, file: &ChangedFile) -> Result<String> {
        let response = self
            .http
            .get(&file.contents_url)
            .bearer_auth(token)
            .header(header::ACCEPT, ACCEPT_RAW)
            .send()
            .await
            .with_context(|| format!("Failed to fetch the content of {}", file.filename))?;
        let status = response.status();
        if status != StatusCode::OK {
            bail!("Content fetch for {} returned {status}", file.filename);
        }
        response.text().await.with_context(|| format!("Failed to read the content of {}", file.filename))
    }

    /// Creates an in-progress check run for the given head sha and returns
    /// the created run's URL for the later completion update.
    pub async fn create_check_run(
        &self,
        tokens: &TokenSupplier,
        webhook: &Webhook,
        head_sha: &str,
    ) -> Result<String> {
        let token = tokens.get_token(webhook.installation.id).await?;
        let response = self
            .http
            .post(webhook.repository.check_runs_url())
            .bearer_auth(&token)
            .header(header::ACCEPT, ACCEPT_JSON)
            .json(&CheckRun::in_progress(head_sha))
            .send()
            .await
            .context("Failed to create check run")?;
        let status = response.status();
        if status != StatusCode::CREATED {
            bail!("Check run creation returned {status}");
        }
        let created: CreatedCheckRun =
            response.json().await.context("Failed to parse check run creation response")?;
        Ok(created.url)
    }

    /// Completes a previously-created check run. Exactly one of `check_errors`
    /// or `fatal_error` determines a failure conclusion; neither means success.
    pub async fn update_check_run(
        &self,
        tokens: &TokenSupplier,
        webhook: &Webhook,
        check_run_url: &str,
        check_errors: &[CheckError],
        fatal_error: Option<&str>,
    ) -> Result<()> {
        let token = tokens.get_token(webhook.installation.id).await?;
        let response = self
            .http
            .patch(check_run_url)
            .bearer_auth(&token)
            .header(header::ACCEPT, ACCEPT_JSON)
            .json(&CheckRun::completed(check_errors, fatal_error))
            .send()
            .await
            .context("Failed to update check run")?;
        let status = response.status();
        if status != StatusCode::OK {
            bail!("Check run update returned {status}");
        }
        Ok(())
    }
}
