//! Signed unlock-link tokens.
//!
//! Format: `base64url(json claims) "." base64url(HMAC-SHA256(claims segment))`, unpadded.
//! The token is opaque to its holder and self-describing to the server, which can check
//! the signature and expiry before touching the store.

use crate::ids::BookingId;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// What an unlock token asserts
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockClaims {
    /// Booking the token opens the door for
    pub booking_id: BookingId,
    /// Booking start, unix seconds
    pub start: i64,
    /// Booking end, unix seconds
    pub end: i64,
    /// Token expiry, unix seconds; equal to `end`
    pub exp: i64,
}

impl UnlockClaims {
    /// Claims for a booking interval, expiring at its end
    #[must_use]
    pub fn for_booking(booking_id: BookingId, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            booking_id,
            start: start.timestamp(),
            end: end.timestamp(),
            exp: end.timestamp(),
        }
    }

    /// Expiry as an instant
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// Why a token was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// Not two base64url segments or not valid claims JSON
    #[error("malformed unlock token")]
    Malformed,

    /// Signature does not match
    #[error("unlock token signature mismatch")]
    BadSignature,

    /// Past `exp`
    #[error("unlock token expired")]
    Expired,

    /// The signing key was rejected by the MAC
    #[error("invalid signing key")]
    InvalidKey,
}

/// Issues and verifies unlock tokens with one shared secret
#[derive(Clone)]
pub struct UnlockTokenSigner {
    secret: Vec<u8>,
}

impl std::fmt::Debug for UnlockTokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockTokenSigner").finish_non_exhaustive()
    }
}

impl UnlockTokenSigner {
    /// Creates a signer from raw key bytes
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|_| TokenError::InvalidKey)
    }

    /// Serialises and signs the claims
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Malformed`] if the claims cannot be encoded.
    pub fn issue(&self, claims: &UnlockClaims) -> Result<String, TokenError> {
        let json = serde_json::to_vec(claims).map_err(|_| TokenError::Malformed)?;
        let payload = URL_SAFE_NO_PAD.encode(json);
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{payload}.{signature}"))
    }

    /// Checks signature then expiry, returning the claims
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] for a malformed, forged or expired token.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<UnlockClaims, TokenError> {
        let (payload, signature) = token.split_once('.').ok_or(TokenError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Malformed)?;

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::Malformed)?;
        let claims: UnlockClaims =
            serde_json::from_slice(&json).map_err(|_| TokenError::Malformed)?;

        if now.timestamp() > claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

/// Short, non-reversible identifier of a token for audit logs
#[must_use]
pub fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    URL_SAFE_NO_PAD.encode(&digest[..9])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn claims() -> UnlockClaims {
        let start = Utc.with_ymd_and_hms(2025, 4, 1, 18, 0, 0).unwrap();
        UnlockClaims::for_booking(BookingId::new(), start, start + Duration::hours(1))
    }

    #[test]
    fn issued_token_verifies_until_end() {
        let signer = UnlockTokenSigner::new("s3cret");
        let claims = claims();
        let token = signer.issue(&claims).unwrap();

        let at_end = DateTime::from_timestamp(claims.end, 0).unwrap();
        assert_eq!(signer.verify(&token, at_end).unwrap(), claims);
        assert_eq!(
            signer.verify(&token, at_end + Duration::seconds(1)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn other_key_or_tampered_payload_is_rejected() {
        let claims = claims();
        let token = UnlockTokenSigner::new("a").issue(&claims).unwrap();
        let now = DateTime::from_timestamp(claims.start, 0).unwrap();

        assert_eq!(
            UnlockTokenSigner::new("b").verify(&token, now),
            Err(TokenError::BadSignature)
        );

        let (_, sig) = token.split_once('.').unwrap();
        let mut forged = claims.clone();
        forged.exp += 3600;
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        assert_eq!(
            UnlockTokenSigner::new("a").verify(&format!("{forged_payload}.{sig}"), now),
            Err(TokenError::BadSignature)
        );
        assert_eq!(
            UnlockTokenSigner::new("a").verify("garbage", now),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn fingerprint_is_stable_and_short() {
        assert_eq!(fingerprint("abc"), fingerprint("abc"));
        assert_eq!(fingerprint("abc").len(), 12);
        assert_ne!(fingerprint("abc"), fingerprint("abd"));
    }
}
