//! Identity token issuance and verification.
//!
//! Tokens are stateless: claims plus an HMAC signature (HS256) keyed by a
//! subkey derived from the application secret. There is no server-side
//! record and no revocation list; expiry is a token's only natural death.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Verification failure detail. Logged internally; the HTTP boundary
/// collapses every variant into one generic 401 so callers cannot probe
/// which sub-check failed.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("signature mismatch")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("malformed token")]
    Malformed,
}

/// Claims carried by every identity token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Subject (user ID).
    pub sub: String,
    pub tenant_id: Uuid,
    pub subdomain: String,
    pub role: String,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Expiration time (Unix timestamp).
    pub exp: i64,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    default_ttl: Duration,
}

impl TokenService {
    pub fn new(signing_key: &Secret<Vec<u8>>, default_ttl_minutes: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(signing_key.expose_secret()),
            decoding_key: DecodingKey::from_secret(signing_key.expose_secret()),
            default_ttl: Duration::minutes(default_ttl_minutes),
        }
    }

    pub fn default_ttl_seconds(&self) -> i64 {
        self.default_ttl.num_seconds()
    }

    /// Issue a signed identity token with the given claims and lifetime.
    pub fn issue(
        &self,
        subject: &str,
        tenant_id: Uuid,
        subdomain: &str,
        role: &str,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = IdentityClaims {
            sub: subject.to_string(),
            tenant_id,
            subdomain: subdomain.to_string(),
            role: role.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|_| TokenError::Malformed)
    }

    /// Issue with the configured default lifetime.
    pub fn issue_default(
        &self,
        subject: &str,
        tenant_id: Uuid,
        subdomain: &str,
        role: &str,
    ) -> Result<String, TokenError> {
        self.issue(subject, tenant_id, subdomain, role, self.default_ttl)
    }

    /// Verify a token: recompute the signature, check expiry, and require
    /// every claim to be present.
    pub fn verify(&self, token: &str) -> Result<IdentityClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;

        let data = decode::<IdentityClaims>(token, &self.decoding_key, &validation).map_err(
            |e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                _ => TokenError::Malformed,
            },
        )?;

        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    fn service(secret: &[u8]) -> TokenService {
        TokenService::new(&Secret::new(secret.to_vec()), 30)
    }

    #[test]
    fn issue_and_verify_roundtrip() {
        let svc = service(b"0123456789abcdef0123456789abcdef");
        let tenant_id = Uuid::new_v4();

        let token = svc
            .issue("user_1", tenant_id, "acme", "member", Duration::minutes(5))
            .unwrap();
        let claims = svc.verify(&token).unwrap();

        assert_eq!(claims.sub, "user_1");
        assert_eq!(claims.tenant_id, tenant_id);
        assert_eq!(claims.subdomain, "acme");
        assert_eq!(claims.role, "member");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn expired_token_is_rejected() {
        let svc = service(b"0123456789abcdef0123456789abcdef");
        let token = svc
            .issue(
                "user_1",
                Uuid::new_v4(),
                "acme",
                "member",
                Duration::minutes(-5),
            )
            .unwrap();

        assert!(matches!(svc.verify(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn wrong_key_signature_is_rejected() {
        let issuer = service(b"0123456789abcdef0123456789abcdef");
        let verifier = service(b"fedcba9876543210fedcba9876543210");
        let token = issuer
            .issue("user_1", Uuid::new_v4(), "acme", "member", Duration::minutes(5))
            .unwrap();

        assert!(matches!(
            verifier.verify(&token),
            Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn garbage_token_is_malformed() {
        let svc = service(b"0123456789abcdef0123456789abcdef");
        assert!(matches!(
            svc.verify("not-a-token"),
            Err(TokenError::Malformed)
        ));
    }

    #[test]
    fn token_missing_claims_is_malformed() {
        let svc = service(b"0123456789abcdef0123456789abcdef");

        // Hand-build a structurally valid, correctly signed token whose
        // payload lacks the tenant claims.
        #[derive(Serialize)]
        struct Partial {
            sub: String,
            iat: i64,
            exp: i64,
        }
        let claims = Partial {
            sub: "user_1".into(),
            iat: Utc::now().timestamp(),
            exp: (Utc::now() + Duration::minutes(5)).timestamp(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"0123456789abcdef0123456789abcdef"),
        )
        .unwrap();

        assert!(matches!(svc.verify(&token), Err(TokenError::Malformed)));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let svc = service(b"0123456789abcdef0123456789abcdef");
        let token = svc
            .issue("user_1", Uuid::new_v4(), "acme", "member", Duration::minutes(5))
            .unwrap();

        let mut parts: Vec<&str> = token.split('.').collect();
        assert_eq!(parts.len(), 3);
        let mut payload: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[1]).unwrap()).unwrap();
        payload["subdomain"] = serde_json::Value::String("other".into());
        let forged = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).unwrap());
        parts[1] = &forged;
        let forged_token = parts.join(".");

        assert!(matches!(
            svc.verify(&forged_token),
            Err(TokenError::InvalidSignature)
        ));
    }
}
