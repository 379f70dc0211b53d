//! Webhook signature verification.
//!
//! Providers sign the raw request body with a shared secret and send
//! `t=<unix seconds>,v1=<hex HMAC-SHA256 of "{t}.{body}">`. More than one `v1` entry may be
//! present while a secret is being rolled; any match is accepted. Timestamps further than
//! the tolerance from now are rejected to limit replays.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Accepted clock difference between the provider and us
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Why a signature was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// No signature header on the request
    #[error("missing signature header")]
    Missing,
    /// Header lacks a timestamp or any `v1` entry
    #[error("malformed signature header")]
    Malformed,
    /// Timestamp outside the tolerance window
    #[error("signature timestamp outside tolerance")]
    StaleTimestamp,
    /// No `v1` entry matches the body
    #[error("signature mismatch")]
    Mismatch,
    /// The configured secret cannot key the MAC
    #[error("invalid webhook secret")]
    InvalidKey,
}

struct ParsedHeader {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

fn parse_header(header: &str) -> Result<ParsedHeader, SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            // entries that are not valid hex can never match
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            },
            _ => {},
        }
    }
    match timestamp {
        Some(timestamp) if !signatures.is_empty() => Ok(ParsedHeader {
            timestamp,
            signatures,
        }),
        _ => Err(SignatureError::Malformed),
    }
}

fn mac(secret: &str, timestamp: i64, body: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac)
}

/// Checks `header` against `body`.
///
/// # Errors
///
/// The [`SignatureError`] describing the first check that failed.
pub fn verify(
    header: Option<&str>,
    body: &[u8],
    secret: &str,
    now: DateTime<Utc>,
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::Missing)?;
    let parsed = parse_header(header)?;
    if (now.timestamp() - parsed.timestamp).abs() > tolerance_secs {
        return Err(SignatureError::StaleTimestamp);
    }
    let expected = mac(secret, parsed.timestamp, body)?;
    // verify_slice compares in constant time
    let matched = parsed
        .signatures
        .iter()
        .any(|candidate| expected.clone().verify_slice(candidate).is_ok());
    if matched { Ok(()) } else { Err(SignatureError::Mismatch) }
}

/// Builds a header value for `body`, as the provider would.
///
/// # Errors
///
/// [`SignatureError::InvalidKey`] if `secret` cannot key the MAC.
pub fn sign(body: &[u8], secret: &str, timestamp: i64) -> Result<String, SignatureError> {
    let digest = mac(secret, timestamp, body)?.finalize().into_bytes();
    Ok(format!("t={timestamp},v1={}", hex::encode(digest)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap()
    }

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"type":"payment_intent.succeeded"}"#;

    #[test]
    fn accepts_a_fresh_signature() {
        let header = sign(BODY, SECRET, now().timestamp()).unwrap();
        assert_eq!(verify(Some(&header), BODY, SECRET, now(), DEFAULT_TOLERANCE_SECS), Ok(()));
    }

    #[test]
    fn rejects_tampered_body_and_wrong_secret() {
        let header = sign(BODY, SECRET, now().timestamp()).unwrap();
        assert_eq!(
            verify(Some(&header), b"{}", SECRET, now(), DEFAULT_TOLERANCE_SECS),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify(Some(&header), BODY, "other", now(), DEFAULT_TOLERANCE_SECS),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn tolerance_is_inclusive_at_three_hundred_seconds() {
        let at_edge = sign(BODY, SECRET, now().timestamp() - 300).unwrap();
        assert!(verify(Some(&at_edge), BODY, SECRET, now(), DEFAULT_TOLERANCE_SECS).is_ok());

        let stale = sign(BODY, SECRET, now().timestamp() - 301).unwrap();
        assert_eq!(
            verify(Some(&stale), BODY, SECRET, now(), DEFAULT_TOLERANCE_SECS),
            Err(SignatureError::StaleTimestamp)
        );
    }

    #[test]
    fn any_matching_v1_entry_is_enough() {
        let good = sign(BODY, SECRET, now().timestamp()).unwrap();
        let (_, digest) = good.split_once("v1=").unwrap();
        let header = format!("t={},v1={},v1={digest}", now().timestamp(), "00".repeat(32));
        assert!(verify(Some(&header), BODY, SECRET, now(), DEFAULT_TOLERANCE_SECS).is_ok());
    }

    #[test]
    fn malformed_and_missing_headers() {
        assert_eq!(
            verify(None, BODY, SECRET, now(), DEFAULT_TOLERANCE_SECS),
            Err(SignatureError::Missing)
        );
        assert_eq!(
            verify(Some("v1=abcd"), BODY, SECRET, now(), DEFAULT_TOLERANCE_SECS),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            verify(Some("t=123"), BODY, SECRET, now(), DEFAULT_TOLERANCE_SECS),
            Err(SignatureError::Malformed)
        );
    }
}
