//! Best-effort wake notifications for the downstream CI event consumer.
//!
//! After an event file lands, the consumer is poked over HTTP so it doesn't
//! have to wait for its next poll. Nothing depends on the poke succeeding.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::webhooks::WorkflowRunSummary;

#[derive(Debug, Error)]
pub enum WakeError {
    #[error("wake request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("wake endpoint returned HTTP {0}")]
    Status(u16),
}

/// Body POSTed to the wake endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WakeNotice {
    pub event_file: String,
    pub repo: String,
    pub workflow: String,
    pub conclusion: String,
    pub branch: String,
    pub run_url: String,
    /// Chat-ready text, `None` when the run isn't worth announcing.
    pub message: Option<String>,
}

impl WakeNotice {
    pub fn new(event_file: impl Into<String>, summary: &WorkflowRunSummary) -> Self {
        WakeNotice {
            event_file: event_file.into(),
            repo: summary.repo.clone(),
            workflow: summary.workflow.clone(),
            conclusion: summary.conclusion.clone(),
            branch: summary.branch.clone(),
            run_url: summary.run_url.clone(),
            message: summary.notification(),
        }
    }
}

/// Sends wake notices to an optional endpoint.
#[derive(Debug, Clone)]
pub struct WakeNotifier {
    client: reqwest::Client,
    url: Option<String>,
    timeout: Duration,
}

impl WakeNotifier {
    pub fn new(client: reqwest::Client, url: Option<String>, timeout: Duration) -> Self {
        WakeNotifier {
            client,
            url,
            timeout,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    /// Sends one notice and waits for the answer. No-op without a URL.
    pub async fn notify(&self, notice: &WakeNotice) -> Result<(), WakeError> {
        let Some(url) = &self.url else {
            return Ok(());
        };

        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(notice)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(WakeError::Status(status.as_u16()));
        }
        Ok(())
    }

    /// Sends a notice on a detached task, logging the outcome.
    ///
    /// Returns `None` when no wake URL is configured.
    pub fn spawn(&self, notice: WakeNotice) -> Option<JoinHandle<()>> {
        if !self.is_enabled() {
            debug!(event_file = %notice.event_file, "No wake URL configured, skipping");
            return None;
        }

        let notifier = self.clone();
        Some(tokio::spawn(async move {
            match notifier.notify(&notice).await {
                Ok(()) => info!(event_file = %notice.event_file, "Wake notification sent"),
                Err(e) => warn!(
                    event_file = %notice.event_file,
                    error = %e,
                    "Wake notification failed"
                ),
            }
        }))
    }
}
