//! GitHub webhook signature verification using HMAC-SHA256.
//!
//! GitHub signs each delivery with a shared secret and sends the result in the
//! `X-Hub-Signature-256` header as `sha256=<hex>`. Verification runs over the
//! raw request bytes, before the body is parsed.

use std::fmt;
use std::fs;
use std::path::Path;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Prefix GitHub puts in front of the hex digest.
const SIGNATURE_PREFIX: &str = "sha256=";

/// Errors loading the shared secret at startup.
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("failed to read webhook secret from {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("webhook secret file {0} is empty")]
    Empty(String),
}

/// The shared secret configured on the GitHub webhook.
///
/// `Debug` never prints the secret bytes.
#[derive(Clone)]
pub struct WebhookSecret(Vec<u8>);

impl WebhookSecret {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        WebhookSecret(secret.into())
    }

    /// Reads the secret from a file, trimming surrounding whitespace.
    pub fn from_file(path: &Path) -> Result<Self, SecretError> {
        let raw = fs::read_to_string(path).map_err(|source| SecretError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SecretError::Empty(path.display().to_string()));
        }
        Ok(WebhookSecret(trimmed.as_bytes().to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WebhookSecret(..)")
    }
}

/// Why a delivery failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// No signature header on the request.
    MissingHeader,
    /// Header present but not `sha256=<even-length hex>`.
    MalformedHeader,
    /// Well-formed header whose digest does not match the body.
    Mismatch,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::MissingHeader => f.write_str("missing signature header"),
            RejectReason::MalformedHeader => f.write_str("malformed signature header"),
            RejectReason::Mismatch => f.write_str("signature mismatch"),
        }
    }
}

/// Outcome of checking one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Verified,
    Rejected(RejectReason),
}

impl Verification {
    pub fn is_verified(&self) -> bool {
        matches!(self, Verification::Verified)
    }
}

/// Checks request bodies against the configured secret.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    secret: WebhookSecret,
}

impl SignatureVerifier {
    pub fn new(secret: WebhookSecret) -> Self {
        SignatureVerifier { secret }
    }

    /// Verifies `body` against the value of the signature header.
    ///
    /// A missing header is rejected before any MAC is computed. The digest
    /// comparison is constant-time. Never panics, whatever the input.
    pub fn verify(&self, body: &[u8], signature_header: Option<&str>) -> Verification {
        let Some(header) = signature_header else {
            return Verification::Rejected(RejectReason::MissingHeader);
        };
        let Some(provided) = parse_signature_header(header) else {
            return Verification::Rejected(RejectReason::MalformedHeader);
        };

        let mut mac = new_mac(self.secret.as_bytes());
        mac.update(body);
        match mac.verify_slice(&provided) {
            Ok(()) => Verification::Verified,
            Err(_) => Verification::Rejected(RejectReason::Mismatch),
        }
    }

    /// Computes the raw HMAC of `body` under this verifier's secret.
    pub fn sign(&self, body: &[u8]) -> Vec<u8> {
        sign(body, self.secret.as_bytes())
    }
}

fn new_mac(secret: &[u8]) -> HmacSha256 {
    match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts keys of any length"),
    }
}

/// Decodes `sha256=<hex>` into digest bytes. `None` for anything else.
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    let hex_digest = header.strip_prefix(SIGNATURE_PREFIX)?;
    hex::decode(hex_digest).ok()
}

/// Computes the HMAC-SHA256 of `body` keyed by `secret`.
pub fn sign(body: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = new_mac(secret);
    mac.update(body);
    mac.finalize().into_bytes().to_vec()
}

/// Renders a digest the way GitHub sends it: `sha256=<lowercase hex>`.
pub fn signature_header(digest: &[u8]) -> String {
    format!("{SIGNATURE_PREFIX}{}", hex::encode(digest))
}
