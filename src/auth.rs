//! # Auth Middleware
//!
//! Bearer-token verification against the secret shared with the external
//! auth service. Tokens are verified once at the WebSocket handshake to
//! bind a `user_id` to the session; handlers re-check that binding per
//! event. Mid-session expiry is not detected; the next handshake fails
//! and the client reconnects.

use crate::error::{EngineError, Result};
use crate::model::UserId;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

/// Claims this service cares about.
#[derive(Debug, Deserialize)]
struct Claims {
    /// The user identifier
    sub: String,
    /// Expiry, seconds since epoch
    #[allow(dead_code)]
    exp: usize,
}

/// Verifies bearer tokens with the shared HS256 secret.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Verify a token and extract the bound user id.
    pub fn verify(&self, token: &str) -> Result<UserId> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|err| EngineError::Auth(format!("invalid token: {}", err)))?;
        if data.claims.sub.is_empty() {
            return Err(EngineError::Auth("token has no subject".to_string()));
        }
        Ok(data.claims.sub)
    }
}

/// Pull the raw token out of an `Authorization` header value.
pub fn parse_bearer(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        exp: usize,
    }

    fn issue(secret: &str, sub: &str, exp_offset: i64) -> String {
        let exp = (chrono::Utc::now().timestamp() + exp_offset) as usize;
        encode(
            &Header::default(),
            &TestClaims {
                sub: sub.to_string(),
                exp,
            },
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_verify_roundtrip() {
        let verifier = TokenVerifier::new("shared-secret");
        let token = issue("shared-secret", "u1", 3600);
        assert_eq!(verifier.verify(&token).unwrap(), "u1");
    }

    #[test]
    fn test_expired_token_rejected() {
        let verifier = TokenVerifier::new("shared-secret");
        let token = issue("shared-secret", "u1", -3600);
        let err = verifier.verify(&token).unwrap_err();
        assert_eq!(err.kind(), "auth_error");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let verifier = TokenVerifier::new("shared-secret");
        let token = issue("other-secret", "u1", 3600);
        assert_eq!(verifier.verify(&token).unwrap_err().kind(), "auth_error");
    }

    #[test]
    fn test_parse_bearer() {
        assert_eq!(parse_bearer("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(parse_bearer("bearer abc"), Some("abc"));
        assert_eq!(parse_bearer("Basic abc"), None);
        assert_eq!(parse_bearer("Bearer "), None);
    }
}
