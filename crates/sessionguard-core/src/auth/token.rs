//! Unsigned access-token claim inspection.
//!
//! Access tokens are three dot-separated segments; the middle one is a
//! base64url JSON payload with an `exp` claim in epoch seconds. Only the
//! expiry hint is read. Signatures are the server's business.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token must have three segments")]
    Malformed,

    #[error("payload is not base64url")]
    Encoding,

    #[error("payload is not JSON: {0}")]
    Payload(String),

    #[error("missing or invalid claim: exp")]
    MissingExp,
}

/// Decode the `exp` claim without verifying the signature.
pub fn expiry(token: &str) -> Result<DateTime<Utc>, TokenError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 || parts[1].is_empty() {
        return Err(TokenError::Malformed);
    }

    let payload = URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|_| TokenError::Encoding)?;
    let claims: JsonValue =
        serde_json::from_slice(&payload).map_err(|e| TokenError::Payload(e.to_string()))?;

    let exp = claims.get("exp").ok_or(TokenError::MissingExp)?;
    let seconds = exp
        .as_i64()
        .or_else(|| exp.as_f64().map(|f| f as i64))
        .ok_or(TokenError::MissingExp)?;

    DateTime::from_timestamp(seconds, 0).ok_or(TokenError::MissingExp)
}

/// True when `token` expires within `window` of `now`.
///
/// A token whose expiry cannot be read is treated as expiring, which routes
/// it through a refresh rather than trusting it.
pub fn expires_within(token: &str, window: Duration, now: DateTime<Utc>) -> bool {
    match expiry(token) {
        Ok(exp) => {
            let window = match chrono::Duration::from_std(window) {
                Ok(w) => w,
                Err(_) => return true,
            };
            match exp.checked_sub_signed(window) {
                Some(refresh_at) => now >= refresh_at,
                None => true,
            }
        }
        Err(e) => {
            warn!(error = %e, "Unable to read access token expiry");
            true
        }
    }
}
