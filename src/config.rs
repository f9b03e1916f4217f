//! Startup configuration.
//!
//! Every setting is a CLI flag that can also come from the environment.
//! `Args` is what clap parses; `GatewayConfig` is the plain value the rest of
//! the crate consumes, so tests can build one without touching the process
//! environment.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::webhooks::{SecretError, WebhookSecret};

pub const DEFAULT_PORT: u16 = 8280;
pub const DEFAULT_LARK_API_BASE: &str = "https://open.larksuite.com/open-apis";
pub const DEFAULT_REFRESH_ACTION: &str = "refresh_dashboard";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Webhook gateway CLI
#[derive(Parser, Debug, Clone)]
#[command(name = "webhook-gateway", version, about = "GitHub CI and Lark card webhook gateway", long_about = None)]
pub struct Args {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// File holding the GitHub webhook secret
    #[arg(long, env = "WEBHOOK_SECRET_FILE", default_value = "/app/webhook_secret.txt")]
    pub webhook_secret_file: PathBuf,

    /// Directory CI event files are written to
    #[arg(long, env = "CI_EVENT_DIR", default_value = "/app/ci-events")]
    pub ci_event_dir: PathBuf,

    /// URL poked after each persisted CI event
    #[arg(long, env = "WAKE_URL")]
    pub wake_url: Option<String>,

    #[arg(long, env = "LARK_APP_ID", default_value = "")]
    pub lark_app_id: String,

    #[arg(long, env = "LARK_APP_SECRET", default_value = "", hide_env_values = true)]
    pub lark_app_secret: String,

    #[arg(long, env = "LARK_API_BASE", default_value = DEFAULT_LARK_API_BASE)]
    pub lark_api_base: String,

    /// Expected `token` on challenge handshakes; unchecked when unset
    #[arg(long, env = "LARK_VERIFICATION_TOKEN", hide_env_values = true)]
    pub lark_verification_token: Option<String>,

    /// Where the exchanged user access token is stored
    #[arg(long, env = "LARK_TOKEN_FILE", default_value = "/app/data/lark-user-token.json")]
    pub lark_token_file: PathBuf,

    /// Upstream that receives card actions
    #[arg(
        long,
        env = "OPENCLAW_WEBHOOK_URL",
        default_value = "http://localhost:18789/webhook/lark"
    )]
    pub forward_url: String,

    #[arg(
        long,
        env = "DASHBOARD_REFRESH_SCRIPT",
        default_value = "/home/ubuntu/.openclaw/workspace/scripts/lark-task-dashboard.py"
    )]
    pub refresh_script: PathBuf,

    #[arg(long, env = "DASHBOARD_REFRESH_INTERPRETER", default_value = "python3")]
    pub refresh_interpreter: String,

    /// Card action that triggers the refresh script instead of a forward
    #[arg(long, env = "DASHBOARD_REFRESH_ACTION", default_value = DEFAULT_REFRESH_ACTION)]
    pub refresh_action: String,

    #[arg(long, env = "FORWARD_TIMEOUT_SECS", default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    pub forward_timeout_secs: u64,

    /// Timeout for wake notifications and OAuth calls
    #[arg(long, env = "OUTBOUND_TIMEOUT_SECS", default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub outbound_timeout_secs: u64,

    #[arg(long, env = "SCRIPT_TIMEOUT_SECS", default_value_t = 15, value_parser = clap::value_parser!(u64).range(1..))]
    pub script_timeout_secs: u64,

    /// Upper bound on handling one inbound request
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub request_timeout_secs: u64,
}

/// Resolved gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub port: u16,
    pub webhook_secret_file: PathBuf,
    pub ci_event_dir: PathBuf,
    pub wake_url: Option<String>,
    pub lark_app_id: String,
    pub lark_app_secret: String,
    pub lark_api_base: String,
    pub lark_verification_token: Option<String>,
    pub lark_token_file: PathBuf,
    pub forward_url: String,
    pub refresh_script: PathBuf,
    pub refresh_interpreter: String,
    pub refresh_action: String,
    pub forward_timeout: Duration,
    pub outbound_timeout: Duration,
    pub script_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            port: DEFAULT_PORT,
            webhook_secret_file: PathBuf::from("/app/webhook_secret.txt"),
            ci_event_dir: PathBuf::from("/app/ci-events"),
            wake_url: None,
            lark_app_id: String::new(),
            lark_app_secret: String::new(),
            lark_api_base: DEFAULT_LARK_API_BASE.to_string(),
            lark_verification_token: None,
            lark_token_file: PathBuf::from("/app/data/lark-user-token.json"),
            forward_url: "http://localhost:18789/webhook/lark".to_string(),
            refresh_script: PathBuf::from(
                "/home/ubuntu/.openclaw/workspace/scripts/lark-task-dashboard.py",
            ),
            refresh_interpreter: "python3".to_string(),
            refresh_action: DEFAULT_REFRESH_ACTION.to_string(),
            forward_timeout: Duration::from_secs(5),
            outbound_timeout: Duration::from_secs(10),
            script_timeout: Duration::from_secs(15),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl GatewayConfig {
    /// Reads the webhook secret from `webhook_secret_file`.
    pub fn load_secret(&self) -> Result<WebhookSecret, ConfigError> {
        Ok(WebhookSecret::from_file(&self.webhook_secret_file)?)
    }
}

impl From<Args> for GatewayConfig {
    fn from(args: Args) -> Self {
        // Empty strings from the environment mean "unset".
        let non_empty = |s: Option<String>| s.filter(|v| !v.trim().is_empty());

        GatewayConfig {
            port: args.port,
            webhook_secret_file: args.webhook_secret_file,
            ci_event_dir: args.ci_event_dir,
            wake_url: non_empty(args.wake_url),
            lark_app_id: args.lark_app_id,
            lark_app_secret: args.lark_app_secret,
            lark_api_base: args.lark_api_base,
            lark_verification_token: non_empty(args.lark_verification_token),
            lark_token_file: args.lark_token_file,
            forward_url: args.forward_url,
            refresh_script: args.refresh_script,
            refresh_interpreter: args.refresh_interpreter,
            refresh_action: args.refresh_action,
            forward_timeout: Duration::from_secs(args.forward_timeout_secs),
            outbound_timeout: Duration::from_secs(args.outbound_timeout_secs),
            script_timeout: Duration::from_secs(args.script_timeout_secs),
            request_timeout: Duration::from_secs(args.request_timeout_secs),
        }
    }
}
