use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// The sha GitHub sends as `before` when there is no prior commit.
pub const ZERO_SHA: &str = "0000000000000000000000000000000000000000";

pub const CHECK_RUN_NAME: &str = "copyright";
const OUTPUT_TITLE: &str = "Galasa copyright check";
const OUTPUT_SUMMARY: &str = "Checks for updated copyright years and licence text";

/// An inbound webhook payload. The wire format carries every section as
/// optional; at most one of `check_suite`, `check_run`, or `pull_request`
/// is meaningful per event.
#[derive(Debug, Clone, Deserialize)]
pub struct Webhook {
    #[serde(default)]
    pub action: String,
    pub check_suite: Option<WebhookCheckSuite>,
    pub check_run: Option<WebhookCheckRun>,
    pub installation: WebhookInstallation,
    pub repository: WebhookRepository,
    pub pull_request: Option<WebhookPullRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookCheckSuite {
    pub id: u64,
    #[serde(default)]
    pub head_sha: String,
    pub pull_requests: Option<Vec<WebhookPullRequest>>,
    pub before: Option<String>,
    pub after: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookCheckRun {
    pub id: u64,
    #[serde(default)]
    pub head_sha: String,
    pub check_suite: WebhookCheckSuite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPullRequest {
    pub number: u64,
    pub url: String,
    pub head: WebhookPullRequestRef,
    pub base: WebhookPullRequestRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPullRequestRef {
    #[serde(default)]
    pub sha: String,
    pub repo: WebhookRepoRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookRepoRef {
    pub id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookInstallation {
    pub id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookRepository {
    pub id: u64,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub compare_url: String,
    #[serde(default)]
    pub commits_url: String,
}

impl WebhookRepository {
    pub fn check_runs_url(&self) -> String { format!("{}/check-runs", self.url) }

    /// Resolves the endpoint listing the files changed between two commits.
    /// An all-zero `before` means there is no prior commit (new branch), so
    /// the single-commit endpoint is used instead of a compare. The `Err`
    /// carries the message to fail the check run with.
    pub fn changed_files_url(&self, before: &str, after: &str) -> Result<String, &'static str> {
        if before == ZERO_SHA {
            if self.commits_url.is_empty() {
                Err("request is missing commits_url")
            } else {
                Ok(self.commits_url.replacen("{/sha}", &format!("/{after}"), 1))
            }
        } else if self.compare_url.is_empty() {
            Err("request is missing compare_url")
        } else {
            Ok(self.compare_url.replacen("{base}", before, 1).replacen("{head}", after, 1))
        }
    }
}

/// One file of a change set, as reported by the changed-files endpoints.
/// Files with status "removed" are never fetched or checked.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangedFile {
    #[serde(default)]
    pub sha: String,
    pub filename: String,
    #[serde(default)]
    pub status: String,
    pub contents_url: String,
}

/// Response shape of the compare and single-commit endpoints, which wrap
/// the file list in an object rather than returning a bare array.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitFiles {
    pub files: Option<Vec<ChangedFile>>,
}

/// A single header-verification failure for one file. `location` is the
/// byte offset of the offending comment block, 0 for whole-file problems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckError {
    pub path: String,
    pub message: String,
    pub location: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallationToken {
    pub token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// An outbound check-run body, POSTed on creation and PATCHed on completion.
#[derive(Debug, Clone, Serialize)]
pub struct CheckRun {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_sha: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
    pub output: CheckRunOutput,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckRunOutput {
    pub title: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Vec<CheckRunAnnotation>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckRunAnnotation {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    #[serde(rename = "annotation_level")]
    pub level: String,
    pub message: String,
}

/// The part of the check-run creation response we care about.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedCheckRun {
    pub url: String,
}

impl CheckRun {
    pub fn in_progress(head_sha: &str) -> Self {
        Self {
            name: CHECK_RUN_NAME.to_string(),
            head_sha: Some(head_sha.to_string()),
            status: "in_progress".to_string(),
            conclusion: None,
            output: CheckRunOutput {
                title: OUTPUT_TITLE.to_string(),
                summary: OUTPUT_SUMMARY.to_string(),
                annotations: None,
            },
        }
    }

    /// Builds the completed body. A fatal error becomes the summary; check
    /// errors become one annotation each; a run never carries both.
    pub fn completed(check_errors: &[CheckError], fatal_error: Option<&str>) -> Self {
        let mut output = CheckRunOutput {
            title: OUTPUT_TITLE.to_string(),
            summary: OUTPUT_SUMMARY.to_string(),
            annotations: None,
        };
        let conclusion = if let Some(fatal_error) = fatal_error {
            output.summary = fatal_error.to_string();
            "failure"
        } else if !check_errors.is_empty() {
            output.annotations = Some(
                check_errors
                    .iter()
                    .map(|error| CheckRunAnnotation {
                        path: error.path.clone(),
                        start_line: 1,
                        end_line: 1,
                        level: "failure".to_string(),
                        message: error.message.clone(),
                    })
                    .collect(),
            );
            "failure"
        } else {
            "success"
        };
        Self {
            name: CHECK_RUN_NAME.to_string(),
            head_sha: None,
            status: "completed".to_string(),
            conclusion: Some(conclusion.to_string()),
            output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repository() -> WebhookRepository {
        WebhookRepository {
            id: 7,
            url: "https://api.github.com/repos/galasa-dev/cli".to_string(),
            compare_url: "https://api.github.com/repos/galasa-dev/cli/compare/{base}...{head}"
                .to_string(),
            commits_url: "https://api.github.com/repos/galasa-dev/cli/commits{/sha}".to_string(),
        }
    }

    #[test]
    fn changed_files_url_substitutes_compare_template() {
        let url = repository().changed_files_url("abc", "def").unwrap();
        assert_eq!(url, "https://api.github.com/repos/galasa-dev/cli/compare/abc...def");
    }

    #[test]
    fn changed_files_url_uses_commits_template_for_zero_before() {
        let url = repository().changed_files_url(ZERO_SHA, "def").unwrap();
        assert_eq!(url, "https://api.github.com/repos/galasa-dev/cli/commits/def");
    }

    #[test]
    fn changed_files_url_reports_missing_templates() {
        let mut repository = repository();
        repository.compare_url = String::new();
        repository.commits_url = String::new();
        assert_eq!(repository.changed_files_url("abc", "def"), Err("request is missing compare_url"));
        assert_eq!(
            repository.changed_files_url(ZERO_SHA, "def"),
            Err("request is missing commits_url")
        );
    }

    #[test]
    fn in_progress_body() {
        let body = serde_json::to_value(CheckRun::in_progress("abc123")).unwrap();
        assert_eq!(body["name"], "copyright");
        assert_eq!(body["head_sha"], "abc123");
        assert_eq!(body["status"], "in_progress");
        assert!(body.get("conclusion").is_none());
        assert!(body["output"].get("annotations").is_none());
    }

    #[test]
    fn completed_body_success() {
        let run = CheckRun::completed(&[], None);
        assert_eq!(run.conclusion.as_deref(), Some("success"));
        assert_eq!(run.status, "completed");
        assert!(run.output.annotations.is_none());
    }

    #[test]
    fn completed_body_with_annotations() {
        let errors = vec![CheckError {
            path: "src/main.java".to_string(),
            message: "Did not find comment block".to_string(),
            location: 0,
        }];
        let run = CheckRun::completed(&errors, None);
        assert_eq!(run.conclusion.as_deref(), Some("failure"));
        let annotations = run.output.annotations.as_deref().unwrap();
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].path, "src/main.java");
        assert_eq!(annotations[0].start_line, 1);
        assert_eq!(annotations[0].end_line, 1);
        assert_eq!(annotations[0].level, "failure");
        // The default summary stays in place when errors are per-file.
        assert_eq!(run.output.summary, "Checks for updated copyright years and licence text");
    }

    #[test]
    fn completed_body_with_fatal_error() {
        let errors = vec![CheckError {
            path: "a.yaml".to_string(),
            message: "ignored".to_string(),
            location: 0,
        }];
        let run = CheckRun::completed(&errors, Some("request is missing compare_url"));
        assert_eq!(run.conclusion.as_deref(), Some("failure"));
        assert_eq!(run.output.summary, "request is missing compare_url");
        // A fatal summary and annotations are mutually exclusive.
        assert!(run.output.annotations.is_none());
    }

    #[test]
    fn annotation_serializes_with_github_field_names() {
        let run = CheckRun::completed(
            &[CheckError { path: "x.go".to_string(), message: "m".to_string(), location: 0 }],
            None,
        );
        let body = serde_json::to_value(run).unwrap();
        let annotation = &body["output"]["annotations"][0];
        assert_eq!(annotation["annotation_level"], "failure");
        assert_eq!(annotation["start_line"], 1);
    }

    #[test]
    fn webhook_parses_check_suite_payload() {
        let webhook: Webhook = serde_json::from_value(serde_json::json!({
            "action": "requested",
            "check_suite": {
                "id": 99,
                "head_sha": "abc123",
                "pull_requests": [],
                "before": "0000000000000000000000000000000000000000",
                "after": "abc123",
            },
            "installation": { "id": 42 },
            "repository": {
                "id": 7,
                "url": "https://api.github.com/repos/galasa-dev/cli",
                "compare_url": "https://api.github.com/repos/galasa-dev/cli/compare/{base}...{head}",
                "commits_url": "https://api.github.com/repos/galasa-dev/cli/commits{/sha}",
            },
        }))
        .unwrap();
        let suite = webhook.check_suite.unwrap();
        assert_eq!(suite.id, 99);
        assert_eq!(suite.before.as_deref(), Some(ZERO_SHA));
        assert!(webhook.check_run.is_none());
        assert!(webhook.pull_request.is_none());
        assert_eq!(webhook.installation.id, 42);
    }

    #[test]
    fn webhook_parses_pull_request_payload() {
        let webhook: Webhook = serde_json::from_value(serde_json::json!({
            "action": "opened",
            "installation": { "id": 42 },
            "repository": { "id": 7, "url": "https://api.github.com/repos/galasa-dev/cli" },
            "pull_request": {
                "number": 12,
                "url": "https://api.github.com/repos/galasa-dev/cli/pulls/12",
                "head": { "sha": "abc123", "repo": { "id": 7 } },
                "base": { "repo": { "id": 7 } },
            },
        }))
        .unwrap();
        let pull_request = webhook.pull_request.unwrap();
        assert_eq!(pull_request.number, 12);
        assert_eq!(pull_request.head.sha, "abc123");
        assert_eq!(pull_request.head.repo.id, pull_request.base.repo.id);
        // The repository templates were absent; resolution reports that.
        assert!(webhook.repository.changed_files_url("abc", "def").is_err());
    }

    #[test]
    fn commit_files_tolerates_null_list() {
        let files: CommitFiles = serde_json::from_str(r#"{"files":null}"#).unwrap();
        assert!(files.files.is_none());
        let files: CommitFiles = serde_json::from_str(r#"{"files":[]}"#).unwrap();
        assert_eq!(files.files.unwrap().len(), 0);
    }
}
