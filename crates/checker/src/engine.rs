use anyhow::Result;
use copycheck_core::models::{ChangedFile, CheckError};
use copycheck_github::GitHubClient;

use crate::headers::HeaderStyle;

/// The portion of the file name after the last `.`, or empty if none.
pub fn file_extension(filename: &str) -> &str {
    filename.rfind('.').map(|index| &filename[index + 1..]).unwrap_or("")
}

/// Routes an extension to its header style. Extensions outside this table
/// are not checked for copyright at all.
pub fn style_for_extension(extension: &str) -> Option<HeaderStyle> {
    match extension {
        "java" | "go" | "ts" | "tsx" | "js" => Some(HeaderStyle::Block),
        "yaml" | "sh" => Some(HeaderStyle::Hash),
        _ => None,
    }
}

/// Resolves the right checker for each changed file, fetches its content,
/// and produces per-file verdicts.
#[derive(Clone)]
pub struct CheckEngine {
    github: GitHubClient,
}

impl CheckEngine {
    pub fn new(github: GitHubClient) -> Self { Self { github } }

    /// Checks one file. Deleted files and unrecognized extensions are
    /// skipped without fetching; a failed content fetch becomes a failing
    /// verdict rather than aborting the surrounding run.
    pub async fn check_file(&self, token: &str, file: &ChangedFile) -> Option<CheckError> {
        if file.status == "removed" {
            return None;
        }
        let extension = file_extension(&file.filename);
        let Some(style) = style_for_extension(extension) else {
            tracing::debug!(file = %file.filename, "Extension is not checked for copyright");
            return None;
        };
        tracing::info!(file = %file.filename, sha = %file.sha, "Checking file");
        match self.github.get_file_content(token, file).await {
            Ok(content) => style.check(&content, &file.filename),
            Err(e) => {
                tracing::warn!(file = %file.filename, "Failed to fetch content: {e:#}");
                Some(CheckError {
                    path: file.filename.clone(),
                    message: format!("{e:#}"),
                    location: 0,
                })
            }
        }
    }

    /// Checks every file changed by a pull request.
    pub async fn check_pull_request(
        &self,
        token: &str,
        check_id: u64,
        pull_request_url: &str,
    ) -> Result<Vec<CheckError>> {
        tracing::info!(check_id, url = pull_request_url, "Checking pull request");
        let files = self.github.get_files_changed(token, pull_request_url).await?;
        Ok(self.check_all(token, check_id, &files).await)
    }

    /// Checks every file changed by a commit range (compare or single
    /// commit endpoint).
    pub async fn check_commit_files(
        &self,
        token: &str,
        check_id: u64,
        files_url: &str,
    ) -> Result<Vec<CheckError>> {
        let files = self.github.get_commit_files_changed(token, files_url).await?;
        Ok(self.check_all(token, check_id, &files).await)
    }

    async fn check_all(
        &self,
        token: &str,
        check_id: u64,
        files: &[ChangedFile],
    ) -> Vec<CheckError> {
        let mut errors = Vec::new();
        for file in files {
            if let Some(error) = self.check_file(token, file).await {
                tracing::info!(check_id, file = %file.filename, "Found problem: {}", error.message);
                errors.push(error);
            }
        }
        errors
    }
}
