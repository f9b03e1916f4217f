//! Inbound webhook parsing and verification.
//!
//! Pure logic only: nothing here does I/O beyond reading the secret file at
//! startup.

pub mod github;
pub mod lark;
pub mod signature;

pub use github::{GithubEventKind, WorkflowRunSummary};
pub use lark::{CardAction, LarkCallback, LarkQuery, classify};
pub use signature::{
    RejectReason, SecretError, SignatureVerifier, Verification, WebhookSecret, sign,
    signature_header,
};
