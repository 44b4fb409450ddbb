//! Password hashing, JWT issuing and the bearer-token guard.

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::State,
    http::{Request, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::AppState;
use crate::error::{
    ApiError, ApiErrorWithMeta, E_BAD_AUTH_HEADER, E_INVALID_TOKEN, MSG_BAD_AUTH_HEADER,
    MSG_INVALID_TOKEN,
};
use crate::responses::{RequestMeta, new_meta};

const ISSUER: &str = "cashback-rewards";

/// Token payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// The user id.
    pub sub: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// Signs and verifies HS256 tokens with a shared secret.
#[derive(Clone)]
pub struct JwtManager {
    expires_in_secs: i64,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtManager {
    pub fn new(secret: &str, expires_in_secs: i64) -> Self {
        Self {
            expires_in_secs,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, user_id: i64, email: &str) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(self.expires_in_secs)).timestamp(),
            iss: ISSUER.to_string(),
        };
        encode(&Header::default(), &claims, &self.encoding_key).context("Failed to sign token")
    }

    /// Verifies signature, issuer and expiry.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.set_issuer(&[ISSUER]);
        let data = decode::<Claims>(token, &self.decoding_key, &validation)?;
        Ok(data.claims)
    }
}

/// Hashes a password on the blocking pool.
pub async fn hash_password(password: String, cost: u32) -> Result<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await?
        .context("Failed to hash password")
}

/// Checks a password against a stored hash on the blocking pool.
///
/// A malformed stored hash counts as a mismatch.
pub async fn verify_password(password: String, hash: String) -> Result<bool> {
    let matched = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await?;
    Ok(matched.unwrap_or(false))
}

/// Rejects requests without a valid `Authorization: Bearer <token>` header and
/// stores the token's [`Claims`] in the request extensions.
///
/// Only a scheme other than `Bearer` is a bad header; a missing or empty token
/// fails verification instead.
pub async fn require_bearer(
    State(st): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, ApiErrorWithMeta> {
    let meta = req
        .extensions()
        .get::<RequestMeta>()
        .cloned()
        .unwrap_or_else(new_meta);

    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();
    let (scheme, token) = header.split_once(' ').unwrap_or((header, ""));
    if scheme != "Bearer" {
        return Err(ApiError::Unauthorized(MSG_BAD_AUTH_HEADER.into())
            .with_meta(meta)
            .with_code(E_BAD_AUTH_HEADER));
    }
    let token = token.trim();

    let claims = st.jwt.verify(token).map_err(|e| {
        debug!(request_id = %meta.request_id, "rejected token: {e}");
        ApiError::Unauthorized(MSG_INVALID_TOKEN.into())
            .with_meta(meta.clone())
            .with_code(E_INVALID_TOKEN)
    })?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn issued_token_verifies() {
        let jwt = JwtManager::new("secret", 60);
        let token = assert_ok!(jwt.issue(7, "ana@example.com"));
        let claims = assert_ok!(jwt.verify(&token));
        assert_eq!(claims.sub, "7");
        assert_eq!(claims.email, "ana@example.com");
    }

    #[test]
    fn rejects_foreign_and_expired_tokens() {
        let jwt = JwtManager::new("secret", 60);
        let other = JwtManager::new("other-secret", 60);
        let token = other.issue(7, "ana@example.com").unwrap();
        assert_err!(jwt.verify(&token));

        // past the default 60s leeway
        let expired = JwtManager::new("secret", -120);
        let token = expired.issue(7, "ana@example.com").unwrap();
        assert_err!(jwt.verify(&token));

        assert_err!(jwt.verify("not-a-token"));
    }

    #[tokio::test]
    async fn password_hash_round_trip() {
        let hash = hash_password("s3cret".into(), 4).await.unwrap();
        assert_ne!(hash, "s3cret");
        assert!(verify_password("s3cret".into(), hash.clone()).await.unwrap());
        assert!(!verify_password("wrong".into(), hash).await.unwrap());
        assert!(!verify_password("s3cret".into(), "plain".into()).await.unwrap());
    }
}
