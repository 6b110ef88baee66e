//! Password hashing, bearer tokens and the request extractors built on them.
//!
//! Passwords are stored as Argon2id PHC strings. Tokens are HS256 JWTs whose
//! expiry is checked with zero leeway: a token is valid strictly before `exp`.

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::models::{now_ts, User};
use crate::server::AppState;
use crate::users;

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow!("failed to hash password: {}", e))
}

/// `Ok(false)` on mismatch; `Err` only for a malformed stored hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| anyhow!("invalid password hash: {}", e))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(anyhow!("failed to verify password: {}", e)),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub sub: String,
    pub id: i64,
    pub email: String,
    pub is_admin: bool,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and verifies access tokens with a single shared secret.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: i64,
}

impl TokenService {
    pub fn new(secret: &str, ttl_minutes: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_secs: ttl_minutes.saturating_mul(60),
        }
    }

    pub fn issue(&self, user: &User) -> Result<String> {
        self.issue_at(user, now_ts())
    }

    pub fn issue_at(&self, user: &User, now: i64) -> Result<String> {
        let claims = Claims {
            sub: user.username.clone(),
            id: user.id,
            email: user.email.clone(),
            is_admin: user.is_admin,
            iat: now,
            exp: now.saturating_add(self.ttl_secs),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| anyhow!("failed to sign token: {}", e))
    }

    pub fn verify(&self, token: &str) -> ApiResult<Claims> {
        self.verify_at(token, now_ts())
    }

    pub fn verify_at(&self, token: &str, now: i64) -> ApiResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked below against `now` with no leeway.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            debug!(error = %e, "token rejected");
            ApiError::credentials()
        })?;

        if now >= data.claims.exp {
            debug!(sub = %data.claims.sub, "token expired");
            return Err(ApiError::credentials());
        }
        Ok(data.claims)
    }
}

/// Check a username/password pair. Unknown users and wrong passwords share
/// one error message.
pub async fn authenticate(pool: &SqlitePool, username: &str, password: &str) -> ApiResult<User> {
    let invalid = || ApiError::Unauthenticated("Incorrect username or password".to_string());

    let user = users::find_by_username(pool, username)
        .await?
        .ok_or_else(invalid)?;
    if !verify_password(password, &user.hashed_password)? {
        return Err(invalid());
    }
    if !user.is_active {
        return Err(ApiError::Forbidden("Inactive user".to_string()));
    }
    Ok(user)
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() || token == "null" {
        return None;
    }
    Some(token)
}

/// The active user named by the request's bearer token, re-read from the
/// store on every request.
pub struct CurrentUser(pub User);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(ApiError::credentials)?;
        let claims = state.tokens.verify(token)?;

        // A renamed account invalidates its tokens; its old username may
        // since belong to someone else.
        let user = users::get(&state.pool, claims.id)
            .await?
            .filter(|user| user.username == claims.sub)
            .ok_or_else(ApiError::credentials)?;
        if !user.is_active {
            return Err(ApiError::Forbidden("Inactive user".to_string()));
        }
        Ok(CurrentUser(user))
    }
}

/// A [`CurrentUser`] whose stored record has the admin flag.
pub struct AdminUser(pub User);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_admin {
            return Err(ApiError::Forbidden(
                "Not enough permissions. Admin access required.".to_string(),
            ));
        }
        Ok(AdminUser(user))
    }
}
