//! Access-token inspection.
//!
//! Only the expiry claim is read; signatures are the server's business.
//! Anything that cannot be decoded counts as expired.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    #[error("Token is not a three-part JWT")]
    Malformed,

    #[error("Token payload is not valid base64url")]
    Encoding,

    #[error("Token payload is not a JSON claim set: {0}")]
    Claims(String),

    #[error("Token expiry is out of range")]
    ExpiryOutOfRange,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    pub exp: i64,
    #[serde(default)]
    pub user_id: Option<i64>,
}

impl Claims {
    pub fn expires_at(&self) -> Result<DateTime<Utc>, TokenError> {
        DateTime::from_timestamp(self.exp, 0).ok_or(TokenError::ExpiryOutOfRange)
    }
}

/// Decode the claim set of a JWT without verifying it
pub fn decode_claims(token: &str) -> Result<Claims, TokenError> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) if !payload.is_empty() => payload,
        _ => return Err(TokenError::Malformed),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| TokenError::Encoding)?;

    serde_json::from_slice(&bytes).map_err(|e| TokenError::Claims(e.to_string()))
}

/// A token is expired when its expiry is at or before `now`
pub fn is_expired_at(token: &str, now: DateTime<Utc>) -> bool {
    match decode_claims(token) {
        Ok(claims) => claims.exp <= now.timestamp(),
        Err(e) => {
            warn!(error = %e, "Failed to decode access token, treating as expired");
            true
        }
    }
}

pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token_with_payload(payload: &str) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    fn token_expiring(at: DateTime<Utc>) -> String {
        token_with_payload(&format!(r#"{{"exp":{},"user_id":3}}"#, at.timestamp()))
    }

    #[test]
    fn test_decode_claims() {
        let exp = DateTime::from_timestamp(1_900_000_000, 0).unwrap();
        let claims = decode_claims(&token_expiring(exp)).unwrap();
        assert_eq!(claims.exp, 1_900_000_000);
        assert_eq!(claims.user_id, Some(3));
        assert_eq!(claims.expires_at().unwrap(), exp);
    }

    #[test]
    fn test_future_token_not_expired() {
        let now = Utc::now();
        assert!(!is_expired_at(&token_expiring(now + Duration::minutes(60)), now));
    }

    #[test]
    fn test_past_token_expired() {
        let now = Utc::now();
        assert!(is_expired_at(&token_expiring(now - Duration::seconds(1)), now));
    }

    #[test]
    fn test_expiry_equal_to_now_is_expired() {
        let now = DateTime::from_timestamp(1_800_000_000, 0).unwrap();
        assert!(is_expired_at(&token_expiring(now), now));
        assert!(!is_expired_at(&token_expiring(now + Duration::seconds(1)), now));
    }

    #[test]
    fn test_malformed_tokens_are_expired() {
        let now = Utc::now();
        assert!(is_expired_at("", now));
        assert!(is_expired_at("not-a-jwt", now));
        assert!(is_expired_at("a.b.c.d", now));
        assert!(is_expired_at("a.!!!.c", now));
        assert!(is_expired_at(&token_with_payload("[1,2,3]"), now));
        assert!(is_expired_at(&token_with_payload(r#"{"sub":"no-exp"}"#), now));
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode_claims("only.two").unwrap_err(), TokenError::Malformed);
        assert_eq!(decode_claims("a..c").unwrap_err(), TokenError::Malformed);
        assert_eq!(decode_claims("a.%%%.c").unwrap_err(), TokenError::Encoding);
    }

    #[test]
    fn test_padded_payload_accepted() {
        let payload = format!("{}==", URL_SAFE_NO_PAD.encode(r#"{"exp":10}"#));
        let token = format!("h.{}.s", payload);
        assert_eq!(decode_claims(&token).unwrap().exp, 10);
    }
}
