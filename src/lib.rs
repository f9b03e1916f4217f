//! Webhook gateway for GitHub CI events and Lark card callbacks.
//!
//! GitHub `workflow_run` deliveries are HMAC-verified and written as one JSON
//! file each for a downstream consumer. Lark callbacks are classified and
//! answered, forwarded upstream, or turned into a local script run.

pub mod config;
pub mod outbound;
pub mod persistence;
pub mod server;
pub mod webhooks;
