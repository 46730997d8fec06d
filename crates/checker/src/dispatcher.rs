use std::sync::Arc;

use anyhow::{Context, Result, bail};
use copycheck_core::models::{Webhook, WebhookCheckSuite, WebhookPullRequest};
use copycheck_github::{GitHubClient, token::TokenSupplier};

use crate::engine::CheckEngine;

/// The verification flow an inbound webhook maps to. At most one section of
/// the payload is meaningful; the first matching arm wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    CheckSuite,
    CheckRun,
    PullRequest,
    Ignored,
}

pub fn classify(webhook: &Webhook) -> Classification {
    if webhook.check_suite.is_some() {
        Classification::CheckSuite
    } else if webhook.check_run.is_some() {
        Classification::CheckRun
    } else if (webhook.action == "opened" || webhook.action == "synchronize")
        && webhook.pull_request.is_some()
    {
        Classification::PullRequest
    } else {
        Classification::Ignored
    }
}

/// Turns one classified webhook into a sequence of check/report actions.
/// Every flow that starts a check run completes it exactly once, whether the
/// verification succeeded, found problems, or failed outright.
#[derive(Clone)]
pub struct EventDispatcher {
    tokens: Arc<TokenSupplier>,
    github: GitHubClient,
    engine: CheckEngine,
}

impl EventDispatcher {
    pub fn new(tokens: Arc<TokenSupplier>, github: GitHubClient) -> Self {
        let engine = CheckEngine::new(github.clone());
        Self { tokens, github, engine }
    }

    /// Entry point for one webhook event, run on its own task. The HTTP
    /// response has long been sent, so failures are logged rather than
    /// propagated.
    pub async fn dispatch(&self, webhook: Webhook) {
        let result = match classify(&webhook) {
            Classification::CheckSuite => self.process_check_suite(&webhook).await,
            Classification::CheckRun => self.process_check_run(&webhook).await,
            Classification::PullRequest => self.process_pull_request(&webhook).await,
            Classification::Ignored => {
                tracing::debug!(action = %webhook.action, "No verification flow for event");
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::error!("Failed to process event: {e:#}");
        }
    }

    async fn process_check_suite(&self, webhook: &Webhook) -> Result<()> {
        let suite = webhook.check_suite.as_ref().context("Missing check_suite section")?;
        if webhook.action != "requested" {
            tracing::debug!(action = %webhook.action, "Ignoring check suite action");
            return Ok(());
        }
        tracing::info!(
            check_id = suite.id,
            repository = %webhook.repository.url,
            "Performing check suite checks"
        );
        self.verify_suite(webhook, suite, suite.id, &suite.head_sha).await
    }

    async fn process_check_run(&self, webhook: &Webhook) -> Result<()> {
        let run = webhook.check_run.as_ref().context("Missing check_run section")?;
        if webhook.action != "rerequested" {
            tracing::debug!(action = %webhook.action, "Ignoring check run action");
            return Ok(());
        }
        tracing::info!(
            check_id = run.id,
            repository = %webhook.repository.url,
            "Performing check run checks"
        );
        self.verify_suite(webhook, &run.check_suite, run.id, &run.head_sha).await
    }

    /// Shared body of the check_suite and check_run flows: attached pull
    /// requests drive a PR verification, otherwise a before/after commit
    /// pair drives a commit-range verification.
    async fn verify_suite(
        &self,
        webhook: &Webhook,
        suite: &WebhookCheckSuite,
        check_id: u64,
        head_sha: &str,
    ) -> Result<()> {
        let pull_requests = suite.pull_requests.as_deref().unwrap_or_default();
        if !pull_requests.is_empty() {
            let check_run_url = self.github.create_check_run(&self.tokens, webhook, head_sha).await?;
            self.verify_pull_requests(webhook, check_id, &check_run_url, pull_requests).await
        } else if let (Some(before), Some(after)) = (&suite.before, &suite.after) {
            let check_run_url = self.github.create_check_run(&self.tokens, webhook, head_sha).await?;
            self.verify_before_after(webhook, check_id, &check_run_url, before, after).await
        } else {
            tracing::warn!(check_id, "Unrecognised payload for check suite");
            Ok(())
        }
    }

    async fn process_pull_request(&self, webhook: &Webhook) -> Result<()> {
        let pull_request =
            webhook.pull_request.as_ref().context("Missing pull_request section")?;
        if pull_request.head.sha.is_empty() {
            bail!("Cannot process a pull request with an empty head sha");
        }
        if webhook.action == "synchronize"
            && pull_request.head.repo.id == pull_request.base.repo.id
        {
            // A same-repo synchronize also triggers a rerequested check run,
            // which does the work; checking here would duplicate it.
            tracing::info!(
                check_id = pull_request.number,
                "Ignoring synchronize for a same-repo pull request"
            );
            return Ok(());
        }
        tracing::info!(
            check_id = pull_request.number,
            repository = %webhook.repository.url,
            "Performing pull request checks"
        );
        let check_run_url =
            self.github.create_check_run(&self.tokens, webhook, &pull_request.head.sha).await?;
        self.verify_pull_requests(
            webhook,
            pull_request.number,
            &check_run_url,
            std::slice::from_ref(pull_request),
        )
        .await
    }

    /// Runs the engine over every attached pull request and completes the
    /// check run once. An enumeration failure becomes the run's fatal
    /// summary; per-file problems become annotations.
    async fn verify_pull_requests(
        &self,
        webhook: &Webhook,
        check_id: u64,
        check_run_url: &str,
        pull_requests: &[WebhookPullRequest],
    ) -> Result<()> {
        let token = match self.tokens.get_token(webhook.installation.id).await {
            Ok(token) => token,
            Err(e) => return self.fail_check_run(webhook, check_id, check_run_url, &e).await,
        };
        let mut check_errors = Vec::new();
        for pull_request in pull_requests {
            match self.engine.check_pull_request(&token, check_id, &pull_request.url).await {
                Ok(errors) => check_errors.extend(errors),
                Err(e) => return self.fail_check_run(webhook, check_id, check_run_url, &e).await,
            }
        }
        if !check_errors.is_empty() {
            tracing::info!(check_id, count = check_errors.len(), "Errors found");
        }
        self.github
            .update_check_run(&self.tokens, webhook, check_run_url, &check_errors, None)
            .await
    }

    async fn verify_before_after(
        &self,
        webhook: &Webhook,
        check_id: u64,
        check_run_url: &str,
        before: &str,
        after: &str,
    ) -> Result<()> {
        tracing::info!(check_id, before, after, "Checking commit range");
        let files_url = match webhook.repository.changed_files_url(before, after) {
            Ok(url) => url,
            Err(message) => {
                return self.set_adhoc_error(webhook, check_id, check_run_url, message).await;
            }
        };
        let token = match self.tokens.get_token(webhook.installation.id).await {
            Ok(token) => token,
            Err(e) => return self.fail_check_run(webhook, check_id, check_run_url, &e).await,
        };
        match self.engine.check_commit_files(&token, check_id, &files_url).await {
            Ok(check_errors) => {
                if !check_errors.is_empty() {
                    tracing::info!(check_id, count = check_errors.len(), "Errors found");
                }
                self.github
                    .update_check_run(&self.tokens, webhook, check_run_url, &check_errors, None)
                    .await
            }
            Err(e) => self.fail_check_run(webhook, check_id, check_run_url, &e).await,
        }
    }

    /// Completes the run as a failure with a structural-precondition message,
    /// bypassing per-file checking.
    async fn set_adhoc_error(
        &self,
        webhook: &Webhook,
        check_id: u64,
        check_run_url: &str,
        message: &str,
    ) -> Result<()> {
        tracing::error!(check_id, "{message}");
        self.github.update_check_run(&self.tokens, webhook, check_run_url, &[], Some(message)).await
    }

    async fn fail_check_run(
        &self,
        webhook: &Webhook,
        check_id: u64,
        check_run_url: &str,
        error: &anyhow::Error,
    ) -> Result<()> {
        tracing::error!(check_id, "Fatal error - {error:#}");
        let fatal = format!("Fatal error - {error:#}");
        self.github
            .update_check_run(&self.tokens, webhook, check_run_url, &[], Some(&fatal))
            .await
    }
}
