use crate::error::{request_id_from_headers, AppError, ServiceError, ServiceResult};
use crate::models::{Id, User};
use crate::state::AppState;
use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use chrono::Utc;
use dashmap::DashMap;
use http::StatusCode;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub id: Id,
    pub name: String,
    pub email: String,
    /// Issued-at, unix seconds.
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn revocation_key(&self) -> String {
        format!("{}-{}", self.id, self.iat)
    }
}

pub fn sign_token(user: &User, secret: &str, ttl_secs: i64) -> ServiceResult<String> {
    let iat = Utc::now().timestamp();
    let claims = Claims {
        id: user.id,
        name: user.name.clone(),
        email: user.email.clone(),
        iat,
        exp: iat + ttl_secs,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ServiceError::Internal(format!("failed to sign token: {e}")))
}

pub fn verify_token(token: &str, secret: &str) -> ServiceResult<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|_| ServiceError::Unauthorized("Invalid token".into()))
}

/// Deny list of logged-out tokens. Entries live until the token's own expiry.
pub trait TokenRevocations: Send + Sync {
    fn revoke(&self, key: String, expires_at: i64);

    /// Expired entries found here are evicted and reported as not revoked.
    fn is_revoked(&self, key: &str, now: i64) -> bool;

    /// Drops every entry whose token has expired; returns how many were removed.
    fn evict_expired(&self, now: i64) -> usize;
}

#[derive(Debug, Default)]
pub struct InMemoryRevocations {
    entries: DashMap<String, i64>,
}

impl InMemoryRevocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TokenRevocations for InMemoryRevocations {
    fn revoke(&self, key: String, expires_at: i64) {
        self.entries.insert(key, expires_at);
    }

    fn is_revoked(&self, key: &str, now: i64) -> bool {
        let expires_at = self.entries.get(key).map(|entry| *entry);
        match expires_at {
            Some(exp) if exp > now => true,
            Some(_) => {
                self.entries.remove(key);
                false
            }
            None => false,
        }
    }

    fn evict_expired(&self, now: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, exp| *exp > now);
        before.saturating_sub(self.entries.len())
    }
}

/// Verifies signature and expiry, then consults the deny list.
pub fn authenticate(token: &str, secret: &str, revocations: &dyn TokenRevocations) -> ServiceResult<Claims> {
    let claims = verify_token(token, secret)?;
    if revocations.is_revoked(&claims.revocation_key(), Utc::now().timestamp()) {
        return Err(ServiceError::Unauthorized("Token has been revoked".into()));
    }
    Ok(claims)
}

pub fn hash_password(password: &str) -> ServiceResult<String> {
    let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| ServiceError::Internal("password hash failed".into()))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
        .unwrap_or(false)
}

/// Caller with a valid bearer token; rejects with 401 otherwise.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);

/// Caller who may be anonymous. Missing, invalid and revoked tokens all read as `None`.
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<Claims>);

async fn bearer_claims(parts: &mut Parts, state: &AppState) -> ServiceResult<Claims> {
    let TypedHeader(Authorization(bearer)) = TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
        .await
        .map_err(|_| ServiceError::Unauthorized("Missing bearer token".into()))?;
    authenticate(bearer.token(), &state.config.jwt_secret, state.revocations.as_ref())
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match bearer_claims(parts, state).await {
            Ok(claims) => Ok(AuthUser(claims)),
            Err(err) => {
                let request_id = request_id_from_headers(&parts.headers);
                Err(AppError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", err.to_string(), request_id))
            }
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for MaybeAuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(MaybeAuthUser(bearer_claims(parts, state).await.ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: 7,
            name: "Teacher".into(),
            email: "teacher@example.com".into(),
            password_hash: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn signed_token_round_trips_claims() {
        let token = sign_token(&user(), "secret", 3600).unwrap();
        let claims = verify_token(&token, "secret").unwrap();
        assert_eq!(claims.id, 7);
        assert_eq!(claims.email, "teacher@example.com");
        assert_eq!(claims.exp - claims.iat, 3600);
        assert_eq!(claims.revocation_key(), format!("7-{}", claims.iat));
    }

    #[test]
    fn wrong_secret_and_expired_tokens_are_rejected() {
        let token = sign_token(&user(), "secret", 3600).unwrap();
        assert!(matches!(verify_token(&token, "other"), Err(ServiceError::Unauthorized(_))));
        let expired = sign_token(&user(), "secret", -10).unwrap();
        assert!(verify_token(&expired, "secret").is_err());
    }

    #[test]
    fn revoked_token_fails_authentication() {
        let revocations = InMemoryRevocations::new();
        let token = sign_token(&user(), "secret", 3600).unwrap();
        let claims = authenticate(&token, "secret", &revocations).unwrap();
        revocations.revoke(claims.revocation_key(), claims.exp);
        assert!(matches!(
            authenticate(&token, "secret", &revocations),
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[test]
    fn expired_revocations_are_evicted() {
        let revocations = InMemoryRevocations::new();
        revocations.revoke("1-100".into(), 200);
        revocations.revoke("2-100".into(), 400);
        assert!(revocations.is_revoked("1-100", 150));
        assert_eq!(revocations.evict_expired(300), 1);
        assert_eq!(revocations.len(), 1);
        assert!(!revocations.is_revoked("2-100", 400));
        assert!(revocations.is_empty());
    }

    #[test]
    fn password_hash_verifies_only_the_same_password() {
        let hash = hash_password("hunter22").unwrap();
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
        assert!(!verify_password("hunter22", "not-a-hash"));
    }
}
