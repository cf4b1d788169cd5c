//! Slack request signing (Events API over HTTP).
//!
//! Signature: `v0=` + hex(HMAC-SHA256(signing_secret, "v0:{timestamp}:{body}")),
//! sent in `X-Slack-Signature` with the timestamp in `X-Slack-Request-Timestamp`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Requests older (or newer) than this are rejected as replays.
pub const MAX_CLOCK_SKEW_SECS: i64 = 60 * 5;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("missing or malformed signature headers")]
    Malformed,
    #[error("request timestamp outside the allowed window")]
    Stale,
    #[error("signature mismatch")]
    Mismatch,
}

fn mac_for(secret: &str, timestamp: &str, body: &[u8]) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    mac
}

/// Compute the `v0=` signature for a request.
pub fn sign(secret: &str, timestamp: &str, body: &[u8]) -> String {
    let tag = mac_for(secret, timestamp, body).finalize().into_bytes();
    format!("v0={}", hex::encode(tag))
}

/// Verify a request against the signing secret. `now` is Unix seconds.
pub fn verify_signature(
    secret: &str,
    timestamp: &str,
    body: &[u8],
    signature: &str,
    now: i64,
) -> Result<(), SignatureError> {
    let ts: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| SignatureError::Malformed)?;
    if (now - ts).abs() > MAX_CLOCK_SKEW_SECS {
        return Err(SignatureError::Stale);
    }
    let hex_sig = signature
        .strip_prefix("v0=")
        .ok_or(SignatureError::Malformed)?;
    let provided = hex::decode(hex_sig).map_err(|_| SignatureError::Malformed)?;
    mac_for(secret, timestamp, body)
        .verify_slice(&provided)
        .map_err(|_| SignatureError::Mismatch)
}
