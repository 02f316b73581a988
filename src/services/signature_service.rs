//! Slack request signing.
//!
//! Slack signs every request with
//! `X-Slack-Signature: v0=hex(HMAC-SHA256(secret, "v0:{timestamp}:{body}"))`
//! and sends the timestamp in `X-Slack-Request-Timestamp`.

use std::time::Duration;

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
pub const SIGNATURE_HEADER: &str = "x-slack-signature";

const SIGNATURE_VERSION: &str = "v0";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing X-Slack-Request-Timestamp header")]
    MissingTimestamp,

    #[error("malformed X-Slack-Request-Timestamp header")]
    InvalidTimestamp,

    #[error("request timestamp is outside the {0}s tolerance window")]
    StaleTimestamp(u64),

    #[error("missing X-Slack-Signature header")]
    MissingSignature,

    #[error("malformed X-Slack-Signature header")]
    InvalidSignature,

    #[error("signature mismatch")]
    Mismatch,
}

/// Verifies inbound requests against the signing secret.
///
/// Without a secret every request passes; `Config::validate` only allows
/// that when the deployment has opted out of signing explicitly.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Option<SecretString>,
    tolerance: Duration,
}

impl SignatureVerifier {
    pub fn new(secret: Option<SecretString>, tolerance: Duration) -> Self {
        Self { secret, tolerance }
    }

    pub fn is_enforced(&self) -> bool {
        self.secret.is_some()
    }

    /// Verify a request against the current wall clock.
    pub fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), SignatureError> {
        if self.secret.is_none() {
            return Ok(());
        }

        let timestamp = headers
            .get(TIMESTAMP_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(SignatureError::MissingTimestamp)?;
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(SignatureError::MissingSignature)?;

        self.verify_at(timestamp, signature, body, chrono::Utc::now().timestamp())
    }

    /// Verify with an explicit `now` (unix seconds).
    pub fn verify_at(
        &self,
        timestamp: &str,
        signature: &str,
        body: &[u8],
        now: i64,
    ) -> Result<(), SignatureError> {
        let Some(secret) = self.secret.as_ref() else {
            return Ok(());
        };

        let ts: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| SignatureError::InvalidTimestamp)?;
        if now.abs_diff(ts) > self.tolerance.as_secs() {
            return Err(SignatureError::StaleTimestamp(self.tolerance.as_secs()));
        }

        let hex_sig = signature
            .trim()
            .strip_prefix("v0=")
            .ok_or(SignatureError::InvalidSignature)?;
        let expected = hex::decode(hex_sig).map_err(|_| SignatureError::InvalidSignature)?;

        let mut mac = keyed_mac(secret.expose_secret());
        mac.update(signing_base(timestamp.trim(), body).as_slice());
        // verify_slice compares in constant time.
        mac.verify_slice(&expected)
            .map_err(|_| SignatureError::Mismatch)
    }
}

/// Compute the `X-Slack-Signature` value for a request.
pub fn sign(secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac = keyed_mac(secret);
    mac.update(signing_base(timestamp, body).as_slice());
    format!(
        "{SIGNATURE_VERSION}={}",
        hex::encode(mac.finalize().into_bytes())
    )
}

fn keyed_mac(secret: &str) -> HmacSha256 {
    // HMAC accepts keys of any length, so this never fails.
    match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts any key length"),
    }
}

fn signing_base(timestamp: &str, body: &[u8]) -> Vec<u8> {
    let mut base = Vec::with_capacity(SIGNATURE_VERSION.len() + timestamp.len() + body.len() + 2);
    base.extend_from_slice(SIGNATURE_VERSION.as_bytes());
    base.push(b':');
    base.extend_from_slice(timestamp.as_bytes());
    base.push(b':');
    base.extend_from_slice(body);
    base
}
