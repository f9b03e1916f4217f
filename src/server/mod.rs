//! HTTP server for the webhook gateway.
//!
//! # Endpoints
//!
//! - `POST /webhook/github` - GitHub deliveries, HMAC-verified; `workflow_run`
//!   events are written to the CI event directory
//! - `GET|POST /webhook/lark` - Lark challenge, OAuth redirect and card actions
//! - `GET /health` - liveness

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::{ConfigError, GatewayConfig};
use crate::outbound::{self, Forwarder, LarkApp, OAuthClient, ScriptRunner, WakeNotifier};
use crate::persistence::{CiEventStore, TokenStore};
use crate::webhooks::{SignatureVerifier, WebhookSecret};

pub mod github;
pub mod health;
pub mod lark;

pub use github::{GithubWebhookError, github_webhook_handler};
pub use health::health_handler;
pub use lark::{lark_get_handler, lark_post_handler};

/// Shared application state.
///
/// Built once at startup and never mutated; handlers get it through axum's
/// `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    verifier: SignatureVerifier,
    events: CiEventStore,
    tokens: TokenStore,
    wake: WakeNotifier,
    forwarder: Forwarder,
    oauth: OAuthClient,
    refresh: ScriptRunner,
    forward_url: String,
    refresh_action: String,
    verification_token: Option<String>,
    request_timeout: Duration,
}

impl AppState {
    /// Wires every component from `config`. All outbound callers share one
    /// HTTP client.
    pub fn new(config: &GatewayConfig, secret: WebhookSecret) -> Result<Self, ConfigError> {
        let client = outbound::http_client()?;

        let app = LarkApp {
            app_id: config.lark_app_id.clone(),
            app_secret: config.lark_app_secret.clone(),
            api_base: config.lark_api_base.clone(),
        };

        Ok(AppState {
            inner: Arc::new(AppStateInner {
                verifier: SignatureVerifier::new(secret),
                events: CiEventStore::new(&config.ci_event_dir),
                tokens: TokenStore::new(&config.lark_token_file),
                wake: WakeNotifier::new(
                    client.clone(),
                    config.wake_url.clone(),
                    config.outbound_timeout,
                ),
                forwarder: Forwarder::new(client.clone(), config.forward_timeout),
                oauth: OAuthClient::new(client, app, config.outbound_timeout),
                refresh: ScriptRunner::new(
                    &config.refresh_interpreter,
                    &config.refresh_script,
                    config.script_timeout,
                ),
                forward_url: config.forward_url.clone(),
                refresh_action: config.refresh_action.clone(),
                verification_token: config.lark_verification_token.clone(),
                request_timeout: config.request_timeout,
            }),
        })
    }

    pub fn verifier(&self) -> &SignatureVerifier {
        &self.inner.verifier
    }

    pub fn events(&self) -> &CiEventStore {
        &self.inner.events
    }

    pub fn ci_event_dir(&self) -> &Path {
        self.inner.events.dir()
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.inner.tokens
    }

    pub fn wake(&self) -> &WakeNotifier {
        &self.inner.wake
    }

    pub fn forwarder(&self) -> &Forwarder {
        &self.inner.forwarder
    }

    pub fn oauth(&self) -> &OAuthClient {
        &self.inner.oauth
    }

    pub fn refresh(&self) -> &ScriptRunner {
        &self.inner.refresh
    }

    pub fn forward_url(&self) -> &str {
        &self.inner.forward_url
    }

    pub fn refresh_action(&self) -> &str {
        &self.inner.refresh_action
    }

    pub fn verification_token(&self) -> Option<&str> {
        self.inner.verification_token.as_deref()
    }

    pub fn request_timeout(&self) -> Duration {
        self.inner.request_timeout
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    let request_timeout = app_state.request_timeout();

    axum::Router::new()
        .route("/webhook/github", post(github_webhook_handler))
        .route("/webhook/lark", get(lark_get_handler).post(lark_post_handler))
        .route("/health", get(health_handler))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}


#[cfg(all(test, unix))]
mod integration_tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::time::Instant;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::{Value, json};
    use tempfile::{TempDir, tempdir};
    use tokio::task::JoinSet;
    use tower::ServiceExt;

    use crate::webhooks::{sign, signature_header};

    const SECRET: &[u8] = b"it's-a-secret";

    struct Harness {
        state: AppState,
        dir: TempDir,
        upstream: MockServer,
    }

    impl Harness {
        async fn new() -> Self {
            Self::with_config(|_| {}).await
        }

        async fn with_config(tweak: impl FnOnce(&mut GatewayConfig)) -> Self {
            let dir = tempdir().unwrap();
            let upstream = MockServer::start_async().await;

            let script = dir.path().join("refresh.sh");
            fs::write(
                &script,
                format!(
                    "echo \"$LARK_CARD_TOKEN\" >> '{}'\n",
                    dir.path().join("refresh.log").display()
                ),
            )
            .unwrap();

            let mut config = GatewayConfig {
                ci_event_dir: dir.path().join("ci-events"),
                lark_token_file: dir.path().join("data").join("token.json"),
                lark_api_base: upstream.url("/open-apis"),
                forward_url: upstream.url("/webhook/lark"),
                refresh_script: script,
                refresh_interpreter: "sh".to_string(),
                forward_timeout: Duration::from_millis(500),
                ..GatewayConfig::default()
            };
            tweak(&mut config);

            let state = AppState::new(&config, WebhookSecret::new(SECRET)).unwrap();
            Harness {
                state,
                dir,
                upstream,
            }
        }

        fn app(&self) -> axum::Router {
            build_router(self.state.clone())
        }

        fn event_files(&self) -> Vec<PathBuf> {
            match fs::read_dir(self.state.ci_event_dir()) {
                Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
                Err(_) => Vec::new(),
            }
        }

        fn refresh_log(&self) -> PathBuf {
            self.dir.path().join("refresh.log")
        }

        async fn mock_token_exchange(&self) {
            self.upstream
                .mock_async(|when, then| {
                    when.method(POST).path("/open-apis/auth/v3/app_access_token/internal");
                    then.status(200)
                        .json_body(json!({"code": 0, "app_access_token": "a-1"}));
                })
                .await;
            self.upstream
                .mock_async(|when, then| {
                    when.method(POST).path("/open-apis/authen/v1/oidc/access_token");
                    then.status(200).json_body(json!({
                        "code": 0,
                        "data": {"access_token": "u-1", "refresh_token": "r-1", "expires_in": 7200}
                    }));
                })
                .await;
        }
    }

    fn github_request(event: Option<&str>, delivery: &str, body: &[u8], secret: &[u8]) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhook/github")
            .header("content-type", "application/json")
            .header("x-github-delivery", delivery)
            .header("x-hub-signature-256", signature_header(&sign(body, secret)));
        if let Some(event) = event {
            builder = builder.header("x-github-event", event);
        }
        builder.body(Body::from(body.to_vec())).unwrap()
    }

    fn lark_post(body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/webhook/lark")
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap()
    }

    fn card_action(action: &str) -> Vec<u8> {
        // Odd spacing on purpose: the forward must not re-serialize.
        format!(
            r#"{{"schema": "2.0", "header": {{"event_type": "card.action.trigger"}},
                "event": {{"token": "c-1", "operator": {{"open_id": "ou_1"}},
                "action": {{"value": {{"action": "{action}"}}}}}}}}"#
        )
        .into_bytes()
    }

    fn workflow_run_body() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "action": "completed",
            "workflow_run": {
                "id": 42,
                "name": "CI",
                "conclusion": "failure",
                "head_branch": "main",
                "html_url": "https://github.com/acme/widgets/actions/runs/42",
                "repository": {"full_name": "acme/widgets"}
            }
        }))
        .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn wait_for(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        done()
    }

    // ─── GitHub ───

    #[tokio::test]
    async fn workflow_run_is_persisted_verbatim() {
        let h = Harness::new().await;
        let body = workflow_run_body();

        let response = h
            .app()
            .oneshot(github_request(Some("workflow_run"), "d-1", &body, SECRET))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["ok"], true);

        let files = h.event_files();
        assert_eq!(files.len(), 1);
        let name = files[0].file_name().unwrap().to_str().unwrap();
        assert_eq!(json["file"], name);
        assert!(name.ends_with("-d-1.json"), "{name}");
        assert_eq!(fs::read(&files[0]).unwrap(), body);
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_and_writes_nothing() {
        let h = Harness::new().await;

        let response = h
            .app()
            .oneshot(github_request(
                Some("workflow_run"),
                "d-2",
                &workflow_run_body(),
                b"wrong-secret",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(h.event_files().is_empty());
    }

    #[tokio::test]
    async fn missing_signature_is_rejected() {
        let h = Harness::new().await;
        let request = Request::builder()
            .method("POST")
            .uri("/webhook/github")
            .header("x-github-event", "workflow_run")
            .body(Body::from(workflow_run_body()))
            .unwrap();

        let response = h.app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(h.event_files().is_empty());
    }

    #[tokio::test]
    async fn other_events_are_acknowledged_without_side_effects() {
        let h = Harness::new().await;
        let body = br#"{"action": "opened"}"#;

        for event in [Some("pull_request"), Some("push"), None] {
            let response = h
                .app()
                .oneshot(github_request(event, "d-3", body, SECRET))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let json = body_json(response).await;
            assert!(
                json["msg"].as_str().unwrap().starts_with("ignored event"),
                "{json}"
            );
        }

        assert!(h.event_files().is_empty());
    }

    #[tokio::test]
    async fn ping_answers_pong() {
        let h = Harness::new().await;

        let response = h
            .app()
            .oneshot(github_request(Some("ping"), "d-4", br#"{"zen": "Keep it simple."}"#, SECRET))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["msg"], "pong");
        assert!(h.event_files().is_empty());
    }

    #[tokio::test]
    async fn signed_garbage_is_a_bad_request() {
        let h = Harness::new().await;

        let response = h
            .app()
            .oneshot(github_request(Some("workflow_run"), "d-5", b"not json", SECRET))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(h.event_files().is_empty());
    }

    #[tokio::test]
    async fn unwritable_event_dir_is_a_server_error() {
        let h = Harness::with_config(|_| {}).await;
        // A regular file where the directory should be.
        fs::write(h.state.ci_event_dir(), b"").unwrap();

        let response = h
            .app()
            .oneshot(github_request(Some("workflow_run"), "d-6", &workflow_run_body(), SECRET))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn persisted_event_triggers_wake_notification() {
        let wake_server = MockServer::start_async().await;
        let wake = wake_server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/wake")
                    .json_body_partial(r#"{"repo": "acme/widgets", "conclusion": "failure"}"#);
                then.status(200);
            })
            .await;
        let wake_url = wake_server.url("/wake");
        let h = Harness::with_config(|c| c.wake_url = Some(wake_url)).await;

        let response = h
            .app()
            .oneshot(github_request(Some("workflow_run"), "d-7", &workflow_run_body(), SECRET))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut hits = 0;
        for _ in 0..100 {
            hits = wake.hits_async().await;
            if hits > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(hits, 1);
    }

    #[tokio::test]
    async fn unreachable_wake_url_does_not_affect_response() {
        let h = Harness::with_config(|c| c.wake_url = Some("http://127.0.0.1:1/wake".to_string()))
            .await;

        let response = h
            .app()
            .oneshot(github_request(Some("workflow_run"), "d-8", &workflow_run_body(), SECRET))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(h.event_files().len(), 1);
    }

    // ─── Lark ───

    #[tokio::test]
    async fn challenge_is_echoed_without_side_effects() {
        let h = Harness::new().await;
        let forward = h
            .upstream
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200);
            })
            .await;

        let response = h
            .app()
            .oneshot(lark_post(r#"{"challenge": "abc123", "token": "t", "type": "url_verification"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"challenge": "abc123"}));
        assert_eq!(forward.hits_async().await, 0);
        assert!(!h.refresh_log().exists());
    }

    #[tokio::test]
    async fn challenge_with_wrong_token_is_rejected_when_token_configured() {
        let h = Harness::with_config(|c| c.lark_verification_token = Some("expected".to_string()))
            .await;

        let bad = h
            .app()
            .oneshot(lark_post(r#"{"challenge": "abc", "token": "nope"}"#))
            .await
            .unwrap();
        assert_eq!(bad.status(), StatusCode::UNAUTHORIZED);

        let good = h
            .app()
            .oneshot(lark_post(r#"{"challenge": "abc", "token": "expected"}"#))
            .await
            .unwrap();
        assert_eq!(good.status(), StatusCode::OK);
        assert_eq!(body_json(good).await["challenge"], "abc");
    }

    #[tokio::test]
    async fn invalid_json_is_a_bad_request() {
        let h = Harness::new().await;

        let response = h.app().oneshot(lark_post("{not json")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn refresh_action_runs_script_once_and_forwards_nothing() {
        let h = Harness::new().await;
        let forward = h
            .upstream
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200);
            })
            .await;

        let response = h
            .app()
            .oneshot(lark_post(card_action("refresh_dashboard")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["toast"]["type"], "success");

        let log = h.refresh_log();
        assert!(wait_for(|| log.exists()).await, "refresh script never ran");
        // Let any stray second run land before counting.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fs::read_to_string(&log).unwrap(), "c-1\n");
        assert_eq!(forward.hits_async().await, 0);
    }

    #[tokio::test]
    async fn other_actions_are_forwarded_byte_for_byte() {
        let h = Harness::new().await;
        let payload = card_action("approve");
        let forward = h
            .upstream
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/webhook/lark")
                    .body(String::from_utf8(payload.clone()).unwrap());
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"toast":{"type":"info","content":"approved"}}"#);
            })
            .await;

        let response = h.app().oneshot(lark_post(payload.clone())).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["toast"]["content"], "approved");
        assert_eq!(forward.hits_async().await, 1);
        assert!(!h.refresh_log().exists());
    }

    #[tokio::test]
    async fn forward_failure_still_answers_with_toast() {
        let h = Harness::new().await;
        h.upstream
            .mock_async(|when, then| {
                when.method(POST);
                then.status(502);
            })
            .await;

        let response = h
            .app()
            .oneshot(lark_post(card_action("approve")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"toast": {"type": "error", "content": "Failed to forward action"}})
        );
    }

    #[tokio::test]
    async fn unrecognized_body_is_acknowledged() {
        let h = Harness::new().await;

        let response = h
            .app()
            .oneshot(lark_post(r#"{"type": "something_else"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn oauth_redirect_saves_token() {
        let h = Harness::new().await;
        h.mock_token_exchange().await;

        let request = Request::builder()
            .uri("/webhook/lark?code=abc&state=s1")
            .body(Body::empty())
            .unwrap();
        let response = h.app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let saved = h.state.tokens().load().unwrap().unwrap();
        assert_eq!(saved.access_token, "u-1");
        assert_eq!(saved.refresh_token.as_deref(), Some("r-1"));
    }

    #[tokio::test]
    async fn oauth_exchange_failure_is_bad_gateway() {
        let h = Harness::new().await;
        h.upstream
            .mock_async(|when, then| {
                when.path("/open-apis/auth/v3/app_access_token/internal");
                then.status(200)
                    .json_body(json!({"code": 99991663, "msg": "app not found"}));
            })
            .await;

        let request = Request::builder()
            .uri("/webhook/lark?code=abc")
            .body(Body::empty())
            .unwrap();
        let response = h.app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(h.state.tokens().load().unwrap().is_none());
    }

    #[tokio::test]
    async fn challenge_on_post_ignores_oauth_code() {
        let h = Harness::new().await;
        let request = Request::builder()
            .method("POST")
            .uri("/webhook/lark?code=abc")
            .body(Body::from(r#"{"challenge": "c"}"#))
            .unwrap();

        let response = h.app().oneshot(request).await.unwrap();

        assert_eq!(body_json(response).await, json!({"challenge": "c"}));
        assert!(h.state.tokens().load().unwrap().is_none());
    }

    #[tokio::test]
    async fn card_action_post_with_code_in_query_is_forwarded() {
        let h = Harness::new().await;
        h.mock_token_exchange().await;
        let forward = h
            .upstream
            .mock_async(|when, then| {
                when.method(POST).path("/webhook/lark");
                then.status(200).json_body(json!({"toast": {"type": "info", "content": "ok"}}));
            })
            .await;

        let request = Request::builder()
            .method("POST")
            .uri("/webhook/lark?code=abc")
            .body(Body::from(card_action("approve")))
            .unwrap();
        let response = h.app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(forward.hits_async().await, 1);
        assert!(h.state.tokens().load().unwrap().is_none());
    }

    #[tokio::test]
    async fn token_save_failure_is_server_error_page() {
        let h = Harness::with_config(|c| {
            // A regular file where the token directory should be.
            let blocker = c.ci_event_dir.with_file_name("blocker");
            fs::write(&blocker, b"").unwrap();
            c.lark_token_file = blocker.join("token.json");
        })
        .await;
        h.mock_token_exchange().await;

        let request = Request::builder()
            .uri("/webhook/lark?code=abc")
            .body(Body::empty())
            .unwrap();
        let response = h.app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let content_type = response.headers()["content-type"].to_str().unwrap();
        assert!(content_type.starts_with("text/html"), "{content_type}");
    }

    #[tokio::test]
    async fn slow_request_hits_request_timeout() {
        let h = Harness::with_config(|c| {
            c.request_timeout = Duration::from_millis(100);
            c.forward_timeout = Duration::from_secs(5);
        })
        .await;
        h.upstream
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200).delay(Duration::from_secs(2));
            })
            .await;

        let started = Instant::now();
        let response = h
            .app()
            .oneshot(lark_post(card_action("approve")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn plain_get_is_acknowledged() {
        let h = Harness::new().await;
        let request = Request::builder()
            .uri("/webhook/lark")
            .body(Body::empty())
            .unwrap();

        let response = h.app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "ok"}));
    }

    // ─── Health ───

    #[tokio::test]
    async fn health_returns_ok() {
        let h = Harness::new().await;
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let response = h.app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"status": "ok", "service": "webhook-gateway"})
        );
    }

    #[tokio::test]
    async fn health_stays_fast_while_forwards_are_stuck() {
        let h = Harness::new().await;
        h.upstream
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200).delay(Duration::from_millis(400));
            })
            .await;

        let mut slow = JoinSet::new();
        for _ in 0..10 {
            let app = h.app();
            slow.spawn(async move { app.oneshot(lark_post(card_action("approve"))).await });
        }

        let started = Instant::now();
        let mut probes = JoinSet::new();
        for _ in 0..20 {
            let app = h.app();
            probes.spawn(async move {
                let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
                app.oneshot(request).await.unwrap().status()
            });
        }
        while let Some(status) = probes.join_next().await {
            assert_eq!(status.unwrap(), StatusCode::OK);
        }
        assert!(started.elapsed() < Duration::from_millis(400));

        while let Some(result) = slow.join_next().await {
            assert_eq!(result.unwrap().unwrap().status(), StatusCode::OK);
        }
    }
}
