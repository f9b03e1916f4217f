//! GitHub event classification and `workflow_run` summaries.
//!
//! The event type comes from the `X-GitHub-Event` header, never from the
//! body. Only `workflow_run` deliveries are persisted; everything else is
//! acknowledged and dropped.

use serde_json::Value;

/// Header carrying the event name.
pub const HEADER_EVENT: &str = "x-github-event";
/// Header carrying the per-delivery GUID.
pub const HEADER_DELIVERY: &str = "x-github-delivery";
/// Header carrying the HMAC signature.
pub const HEADER_SIGNATURE: &str = "x-hub-signature-256";

/// The one event type the gateway persists.
pub const WORKFLOW_RUN_EVENT: &str = "workflow_run";

/// Workflow names treated as deployments (compared case-insensitively).
const DEPLOY_WORKFLOWS: [&str; 3] = ["deploy", "deployment", "release"];

/// What the gateway does with a delivery, decided from its event header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GithubEventKind {
    /// Sent once when the hook is created.
    Ping,
    /// A workflow run changed state; persisted.
    WorkflowRun,
    /// Anything else, including a missing header. Acknowledged, no side effect.
    Ignored(String),
}

impl GithubEventKind {
    pub fn from_header(event: Option<&str>) -> Self {
        match event {
            Some("ping") => GithubEventKind::Ping,
            Some(WORKFLOW_RUN_EVENT) => GithubEventKind::WorkflowRun,
            Some(other) => GithubEventKind::Ignored(other.to_string()),
            None => GithubEventKind::Ignored(String::new()),
        }
    }
}

/// The interesting fields of a `workflow_run` payload.
///
/// Missing fields become empty strings; the summary is informational only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowRunSummary {
    pub action: String,
    pub run_id: Option<u64>,
    pub repo: String,
    pub workflow: String,
    pub conclusion: String,
    pub branch: String,
    pub run_url: String,
    pub commit_title: String,
    pub pull_request: Option<u64>,
}

impl WorkflowRunSummary {
    pub fn from_payload(payload: &Value) -> Self {
        let run = &payload["workflow_run"];
        let text = |v: &Value| v.as_str().unwrap_or_default().to_string();

        WorkflowRunSummary {
            action: text(&payload["action"]),
            run_id: run["id"].as_u64(),
            repo: text(&run["repository"]["full_name"]),
            workflow: text(&run["name"]),
            conclusion: text(&run["conclusion"]),
            branch: text(&run["head_branch"]),
            run_url: text(&run["html_url"]),
            commit_title: run["head_commit"]["message"]
                .as_str()
                .and_then(|m| m.lines().next())
                .unwrap_or_default()
                .to_string(),
            pull_request: run["pull_requests"][0]["number"].as_u64(),
        }
    }

    pub fn is_deploy(&self) -> bool {
        let name = self.workflow.trim().to_lowercase();
        DEPLOY_WORKFLOWS.contains(&name.as_str())
    }

    /// Renders a chat-ready notification for completed runs worth announcing.
    ///
    /// Deploy successes and failed, cancelled or timed-out runs produce a
    /// message. Plain CI successes and in-progress runs return `None`.
    pub fn notification(&self) -> Option<String> {
        if self.action != "completed" {
            return None;
        }

        let headline = match self.conclusion.as_str() {
            "success" if self.is_deploy() => "🚀 Deploy Succeeded".to_string(),
            "failure" => "❌ CI Failure".to_string(),
            "cancelled" => "⚠️ CI Cancelled".to_string(),
            "timed_out" => "⚠️ CI Timed Out".to_string(),
            _ => return None,
        };

        let or_unknown = |s: &str| {
            if s.is_empty() {
                "unknown".to_string()
            } else {
                s.to_string()
            }
        };

        let mut lines = vec![
            headline,
            format!("Repo: {}", or_unknown(&self.repo)),
            format!("Workflow: {}", or_unknown(&self.workflow)),
            format!("Branch: {}", or_unknown(&self.branch)),
        ];
        if !self.commit_title.is_empty() {
            lines.push(format!("Commit: {}", self.commit_title));
        }
        if let Some(pr) = self.pull_request {
            lines.push(format!("PR: #{pr}"));
        }
        lines.push(format!("Link: {}", self.run_url));

        Some(lines.join("\n"))
    }
}
