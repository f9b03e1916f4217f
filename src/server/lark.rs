//! Lark callback endpoint.
//!
//! `GET` and `POST` share one classifier; the handlers only differ in where
//! the body comes from.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use serde_json::{Value, json};
use subtle::ConstantTimeEq;
use tracing::{debug, error, info, warn};

use super::AppState;
use crate::webhooks::{CardAction, LarkCallback, LarkQuery, classify};

const OAUTH_SUCCESS_PAGE: &str = "<html><body><h2>Authorization successful</h2>\
<p>The Lark access token has been saved. You can close this window.</p></body></html>";
const OAUTH_EXCHANGE_FAILED_PAGE: &str = "<html><body><h2>Authorization failed</h2>\
<p>The authorization code could not be exchanged. Please try again.</p></body></html>";
const OAUTH_SAVE_FAILED_PAGE: &str = "<html><body><h2>Authorization failed</h2>\
<p>The access token could not be saved.</p></body></html>";

/// `POST /webhook/lark`. A body that isn't JSON is a 400.
pub async fn lark_post_handler(
    State(app_state): State<AppState>,
    Query(query): Query<LarkQuery>,
    body: Bytes,
) -> Response {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Lark callback body is not valid JSON");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "invalid JSON body"})),
            )
                .into_response();
        }
    };

    let callback = classify(&query, Some(&payload));
    dispatch(&app_state, callback, body).await
}

/// `GET /webhook/lark`, used by the OAuth redirect.
pub async fn lark_get_handler(
    State(app_state): State<AppState>,
    Query(query): Query<LarkQuery>,
) -> Response {
    let callback = classify(&query, None);
    dispatch(&app_state, callback, Bytes::new()).await
}

async fn dispatch(app_state: &AppState, callback: LarkCallback, raw: Bytes) -> Response {
    match callback {
        LarkCallback::Challenge { challenge, token } => {
            handle_challenge(app_state, challenge, token.as_deref())
        }
        LarkCallback::OAuthRedirect { code, state } => {
            handle_oauth(app_state, &code, state.as_deref()).await
        }
        LarkCallback::CardAction(action) => handle_card_action(app_state, action, raw).await,
        LarkCallback::Unhandled => {
            debug!("Unhandled Lark callback");
            Json(json!({"status": "ok"})).into_response()
        }
    }
}

fn handle_challenge(app_state: &AppState, challenge: Value, token: Option<&str>) -> Response {
    if let Some(expected) = app_state.verification_token() {
        let matches = token.is_some_and(|t| constant_time_eq(t.as_bytes(), expected.as_bytes()));
        if !matches {
            warn!("Lark challenge with wrong verification token");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "invalid verification token"})),
            )
                .into_response();
        }
    }

    info!("Answering Lark URL verification challenge");
    Json(json!({"challenge": challenge})).into_response()
}

async fn handle_oauth(app_state: &AppState, code: &str, state: Option<&str>) -> Response {
    info!(state = state.unwrap_or_default(), "OAuth redirect received");

    let token = match app_state.oauth().exchange_code(code).await {
        Ok(token) => token,
        Err(e) => {
            error!(error = %e, "OAuth code exchange failed");
            return (StatusCode::BAD_GATEWAY, Html(OAUTH_EXCHANGE_FAILED_PAGE)).into_response();
        }
    };

    if let Err(e) = app_state.tokens().save(&token) {
        error!(error = %e, path = %app_state.tokens().path().display(), "Failed to save access token");
        return (StatusCode::INTERNAL_SERVER_ERROR, Html(OAUTH_SAVE_FAILED_PAGE)).into_response();
    }

    info!(path = %app_state.tokens().path().display(), "Lark user access token saved");
    Html(OAUTH_SUCCESS_PAGE).into_response()
}

async fn handle_card_action(app_state: &AppState, action: CardAction, raw: Bytes) -> Response {
    if action.is(app_state.refresh_action()) {
        info!(action = app_state.refresh_action(), "Triggering dashboard refresh");
        app_state.refresh().spawn(action);
        return Json(toast("success", "Dashboard refresh started")).into_response();
    }

    debug!(action = action.action.as_deref().unwrap_or_default(), "Forwarding card action");

    match app_state.forwarder().forward(app_state.forward_url(), raw).await {
        Ok(upstream) => {
            let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::OK);
            let content_type = upstream
                .content_type
                .as_deref()
                .and_then(|ct| HeaderValue::from_str(ct).ok())
                .unwrap_or_else(|| HeaderValue::from_static("application/json"));
            (status, [(CONTENT_TYPE, content_type)], upstream.body).into_response()
        }
        Err(e) => {
            warn!(error = %e, url = app_state.forward_url(), "Card action forward failed");
            Json(toast("error", "Failed to forward action")).into_response()
        }
    }
}

fn toast(kind: &str, content: &str) -> Value {
    json!({"toast": {"type": kind, "content": content}})
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
