//! Calls the gateway makes to other services and processes.

pub mod forward;
pub mod oauth;
pub mod script;
pub mod wake;

pub use forward::{ForwardError, ForwardResponse, Forwarder};
pub use oauth::{LarkApp, OAuthClient, OAuthError};
pub use script::{ScriptError, ScriptRunner};
pub use wake::{WakeError, WakeNotice, WakeNotifier};

/// Builds the HTTP client shared by every outbound caller.
///
/// Per-request timeouts are set by each caller.
pub fn http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
}
