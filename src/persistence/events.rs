//! CI event files.
//!
//! Each accepted `workflow_run` delivery becomes one file in the event
//! directory, holding the payload bytes exactly as GitHub sent them:
//!
//! ```text
//! <event_dir>/<unix-micros>-<identifier>.json
//! ```
//!
//! Files are never modified or removed here; the downstream consumer owns
//! them once they appear.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::atomic::{WriteMode, write_atomic};

/// Longest identifier carried into a file name.
const MAX_IDENTIFIER_LEN: usize = 64;

/// Fallback when neither a delivery id nor a run id is usable.
const DEFAULT_IDENTIFIER: &str = "event";

/// Errors persisting an event.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("event file already exists: {0}")]
    Collision(PathBuf),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A persisted event file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    pub path: PathBuf,
}

impl StoredEvent {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Writes CI events into a single directory.
#[derive(Debug, Clone)]
pub struct CiEventStore {
    dir: PathBuf,
}

impl CiEventStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CiEventStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persists `payload` verbatim under a fresh, collision-free name.
    ///
    /// `delivery_id` is preferred as the identifier; `run_id` is used when the
    /// delivery id is missing or unsafe in a file name.
    pub fn persist(
        &self,
        payload: &[u8],
        delivery_id: Option<&str>,
        run_id: Option<u64>,
    ) -> Result<StoredEvent, StoreError> {
        self.persist_at(Utc::now(), payload, delivery_id, run_id)
    }

    fn persist_at(
        &self,
        at: DateTime<Utc>,
        payload: &[u8],
        delivery_id: Option<&str>,
        run_id: Option<u64>,
    ) -> Result<StoredEvent, StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;

        let identifier = event_identifier(delivery_id, run_id);
        let path = self
            .dir
            .join(format!("{}-{identifier}.json", at.timestamp_micros()));

        match write_atomic(&path, payload, WriteMode::CreateNew) {
            Ok(()) => Ok(StoredEvent { path }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(StoreError::Collision(path)),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }
}

/// Picks the file-name identifier for an event.
fn event_identifier(delivery_id: Option<&str>, run_id: Option<u64>) -> String {
    if let Some(id) = delivery_id.filter(|id| is_safe_identifier(id)) {
        return id.to_string();
    }
    match run_id {
        Some(run) => format!("run{run}"),
        None => DEFAULT_IDENTIFIER.to_string(),
    }
}

/// ASCII alphanumerics, `-` and `_` only, so ids can't escape the directory
/// or hide as dotfiles.
fn is_safe_identifier(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_IDENTIFIER_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
