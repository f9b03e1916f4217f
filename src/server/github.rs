//! GitHub webhook endpoint.
//!
//! Verifies the signature before anything else, then persists `workflow_run`
//! deliveries verbatim and pokes the downstream consumer. Every other event
//! is acknowledged and dropped.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::AppState;
use crate::outbound::WakeNotice;
use crate::persistence::StoreError;
use crate::webhooks::github::{HEADER_DELIVERY, HEADER_EVENT, HEADER_SIGNATURE};
use crate::webhooks::{GithubEventKind, RejectReason, Verification, WorkflowRunSummary};

#[derive(Debug, Error)]
pub enum GithubWebhookError {
    #[error("invalid signature: {0}")]
    InvalidSignature(RejectReason),

    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("failed to persist event: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for GithubWebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            GithubWebhookError::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
            GithubWebhookError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            GithubWebhookError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({"ok": false, "error": self.to_string()});
        (status, Json(body)).into_response()
    }
}

/// `POST /webhook/github`.
///
/// - 200 `{"ok": true, "file": ...}` when a `workflow_run` event was written
/// - 200 `{"ok": true, "msg": ...}` for `ping` and filtered events
/// - 400 when the body is not JSON
/// - 401 when the signature is missing or wrong
/// - 500 when the event could not be written, so GitHub redelivers it
pub async fn github_webhook_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, GithubWebhookError> {
    let event_type = header(&headers, HEADER_EVENT);
    let delivery_id = header(&headers, HEADER_DELIVERY);

    debug!(
        event_type = event_type.unwrap_or_default(),
        delivery_id = delivery_id.unwrap_or_default(),
        "Received GitHub webhook"
    );

    if let Verification::Rejected(reason) = app_state
        .verifier()
        .verify(&body, header(&headers, HEADER_SIGNATURE))
    {
        warn!(
            delivery_id = delivery_id.unwrap_or_default(),
            reason = %reason,
            "Rejected GitHub webhook"
        );
        return Err(GithubWebhookError::InvalidSignature(reason));
    }

    let payload: Value = serde_json::from_slice(&body)?;

    match GithubEventKind::from_header(event_type) {
        GithubEventKind::Ping => {
            info!(delivery_id = delivery_id.unwrap_or_default(), "Ping received");
            Ok(Json(json!({"ok": true, "msg": "pong"})))
        }
        GithubEventKind::Ignored(other) => {
            debug!(event_type = %other, "Ignoring event");
            Ok(Json(json!({"ok": true, "msg": format!("ignored event: {other}")})))
        }
        GithubEventKind::WorkflowRun => {
            let summary = WorkflowRunSummary::from_payload(&payload);
            let stored = app_state
                .events()
                .persist(&body, delivery_id, summary.run_id)
                .inspect_err(|e| error!(error = %e, "Failed to persist CI event"))?;
            let file = stored.file_name();

            info!(
                file = %file,
                repo = %summary.repo,
                workflow = %summary.workflow,
                action = %summary.action,
                conclusion = %summary.conclusion,
                "CI event persisted"
            );

            app_state.wake().spawn(WakeNotice::new(file.clone(), &summary));

            Ok(Json(json!({"ok": true, "file": file})))
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
