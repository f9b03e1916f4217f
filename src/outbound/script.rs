//! Local dashboard refresh script.
//!
//! The script is opaque: the gateway launches it with the card context in
//! its environment, bounds its runtime, and reports how it ended.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::webhooks::CardAction;

/// Environment variable carrying the card token.
pub const ENV_CARD_TOKEN: &str = "LARK_CARD_TOKEN";
/// Environment variable carrying the operator's open id.
pub const ENV_OPERATOR_OPEN_ID: &str = "LARK_OPERATOR_OPEN_ID";

/// How much of stderr is kept in error messages.
const STDERR_EXCERPT_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("script timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("script exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },
}

/// Runs `<interpreter> <script>` on demand.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    interpreter: String,
    script: PathBuf,
    timeout: Duration,
}

impl ScriptRunner {
    pub fn new(interpreter: impl Into<String>, script: impl Into<PathBuf>, timeout: Duration) -> Self {
        ScriptRunner {
            interpreter: interpreter.into(),
            script: script.into(),
            timeout,
        }
    }

    /// Runs the script to completion. The child is killed on timeout.
    pub async fn run(&self, action: &CardAction) -> Result<(), ScriptError> {
        let mut command = Command::new(&self.interpreter);
        command
            .arg(&self.script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(token) = &action.card_token {
            command.env(ENV_CARD_TOKEN, token);
        }
        if let Some(open_id) = &action.operator_open_id {
            command.env(ENV_OPERATOR_OPEN_ID, open_id);
        }

        let child = command.spawn().map_err(|source| ScriptError::Spawn {
            program: self.interpreter.clone(),
            source,
        })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| ScriptError::Spawn {
                program: self.interpreter.clone(),
                source,
            })?,
            Err(_) => return Err(ScriptError::Timeout(self.timeout)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ScriptError::Failed {
                status: output.status,
                stderr: stderr.chars().take(STDERR_EXCERPT_LEN).collect(),
            });
        }
        Ok(())
    }

    /// Runs the script on a detached task, logging failures.
    pub fn spawn(&self, action: CardAction) -> JoinHandle<()> {
        let runner = self.clone();
        tokio::spawn(async move {
            match runner.run(&action).await {
                Ok(()) => info!(script = %runner.script.display(), "Dashboard refresh finished"),
                Err(e) => error!(
                    script = %runner.script.display(),
                    error = %e,
                    "Dashboard refresh failed"
                ),
            }
        })
    }
}
