//! Delegate stream token validation.
//!
//! A delegate opens its streaming connection with an HS256-signed JWT
//! whose claims bind the token to one `{account_id, delegate_id}` pair.
//! Token *issuance* happens out-of-band (fleet provisioning); the
//! manager only verifies. Caller-side API authentication is an explicit
//! non-goal and is intentionally absent.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use relay_core::error::CoreError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims embedded in every delegate stream token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DelegateClaims {
    /// Subject -- the delegate id the token was issued to.
    pub sub: String,
    /// The account whose channel the delegate may join.
    pub acct: String,
    /// Expiration time (UTC Unix timestamp).
    pub exp: i64,
    /// Issued-at time (UTC Unix timestamp).
    pub iat: i64,
    /// Unique token identifier for audit trails.
    pub jti: String,
}

/// Generate a stream token for the given delegate.
///
/// Used by provisioning tooling and tests; the serving path only
/// verifies.
pub fn generate_stream_token(
    account_id: &str,
    delegate_id: &str,
    ttl_secs: i64,
    secret: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = chrono::Utc::now().timestamp();
    let claims = DelegateClaims {
        sub: delegate_id.to_string(),
        acct: account_id.to_string(),
        exp: now + ttl_secs,
        iat: now,
        jti: Uuid::new_v4().to_string(),
    };

    encode(
        &Header::default(), // HS256
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Verify a stream token and its binding to `{account_id, delegate_id}`.
///
/// Signature and expiry are checked first; a structurally valid token
/// presented for the wrong account or delegate is rejected the same way
/// a forged one is.
pub fn validate_stream_token(
    secret: &str,
    token: &str,
    account_id: &str,
    delegate_id: &str,
) -> Result<DelegateClaims, CoreError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;

    let claims = decode::<DelegateClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| CoreError::Unauthorized(format!("Invalid stream token: {e}")))?
    .claims;

    if claims.acct != account_id || claims.sub != delegate_id {
        return Err(CoreError::Unauthorized(
            "Stream token is not valid for this account/delegate".to_string(),
        ));
    }

    Ok(claims)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn round_trip_validates() {
        let token = generate_stream_token("acct-1", "delegate-1", 300, SECRET).unwrap();
        let claims = validate_stream_token(SECRET, &token, "acct-1", "delegate-1").unwrap();
        assert_eq!(claims.sub, "delegate-1");
        assert_eq!(claims.acct, "acct-1");
    }

    #[test]
    fn wrong_binding_rejected() {
        let token = generate_stream_token("acct-1", "delegate-1", 300, SECRET).unwrap();
        assert!(validate_stream_token(SECRET, &token, "acct-2", "delegate-1").is_err());
        assert!(validate_stream_token(SECRET, &token, "acct-1", "delegate-2").is_err());
    }

    #[test]
    fn wrong_secret_rejected() {
        let token = generate_stream_token("acct-1", "delegate-1", 300, SECRET).unwrap();
        assert!(validate_stream_token("other-secret", &token, "acct-1", "delegate-1").is_err());
    }

    #[test]
    fn expired_token_rejected() {
        let token = generate_stream_token("acct-1", "delegate-1", -60, SECRET).unwrap();
        assert!(validate_stream_token(SECRET, &token, "acct-1", "delegate-1").is_err());
    }
}
