//! Authentication and workspace authorization.
//!
//! Passwords are SHA-256 pre-hashed (hex) before bcrypt, sidestepping
//! bcrypt's 72-byte input limit without weakening the work factor.
//! Sessions are stateless JWT bearer tokens (HS256) carrying the user id
//! and email.
//!
//! With `[auth] disabled = true` every request resolves to a fixed demo
//! identity holding `admin` everywhere — local development only.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;

use docvault_core::models::WorkspaceRole;
use docvault_core::pipeline::{Caller, RoleResolver};
use docvault_core::Error;

use crate::config::AuthConfig;
use crate::server::{AppError, AppState};

/// Identity of the demo user used when auth is disabled.
pub const DEMO_USER_ID: &str = "00000000-0000-0000-0000-000000000000";
pub const DEMO_USER_EMAIL: &str = "demo@local";

const FALLBACK_SECRET: &str = "docvault-dev-secret";

/// JWT claims carried by an access token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub email: String,
    /// Expiration, unix seconds.
    pub exp: usize,
    /// Issued at, unix seconds.
    pub iat: usize,
}

/// Resolve the JWT signing secret: env var first, then config, then a
/// development fallback.
pub fn jwt_secret(config: &AuthConfig) -> String {
    if let Ok(secret) = std::env::var("DOCVAULT_JWT_SECRET") {
        if !secret.is_empty() {
            return secret;
        }
    }
    if let Some(secret) = &config.secret {
        if !secret.is_empty() {
            return secret.clone();
        }
    }
    tracing::warn!("DOCVAULT_JWT_SECRET not set, using the development fallback secret");
    FALLBACK_SECRET.to_string()
}

fn prehash(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hash a password for storage.
pub fn hash_password(password: &str) -> Result<String, Error> {
    bcrypt::hash(prehash(password), bcrypt::DEFAULT_COST)
        .map_err(|e| Error::Store(format!("password hashing failed: {}", e)))
}

/// Verify a password against a stored hash. A malformed stored hash
/// verifies as false, never as an error a caller could probe.
pub fn verify_password(password: &str, hashed: &str) -> bool {
    bcrypt::verify(prehash(password), hashed).unwrap_or(false)
}

/// Issue an access token for a user.
pub fn create_access_token(
    user_id: &str,
    email: &str,
    config: &AuthConfig,
) -> Result<String, Error> {
    let now = Utc::now();
    let exp = now + Duration::minutes(config.token_exp_minutes);
    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_string(),
        exp: exp.timestamp() as usize,
        iat: now.timestamp() as usize,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(jwt_secret(config).as_bytes()),
    )
    .map_err(|e| Error::Store(format!("token issuance failed: {}", e)))
}

/// Decode and validate an access token.
pub fn decode_token(token: &str, config: &AuthConfig) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret(config).as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
    .ok()
}

/// The authenticated caller, extracted from the bearer token.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Caller);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if state.config.auth.disabled {
            return Ok(CurrentUser(Caller {
                user_id: DEMO_USER_ID.to_string(),
                email: DEMO_USER_EMAIL.to_string(),
            }));
        }

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::unauthorized("Missing bearer token."))?;

        let claims = decode_token(token, &state.config.auth)
            .ok_or_else(|| AppError::unauthorized("Invalid token."))?;

        Uuid::parse_str(&claims.sub)
            .map_err(|_| AppError::unauthorized("Invalid token payload."))?;

        // The token may outlive the account.
        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM users WHERE id = ?")
            .bind(&claims.sub)
            .fetch_optional(&state.pool)
            .await
            .map_err(|e| AppError::internal(e.to_string()))?;
        if exists.is_none() {
            return Err(AppError::unauthorized("User not found."));
        }

        Ok(CurrentUser(Caller {
            user_id: claims.sub,
            email: claims.email,
        }))
    }
}

/// Resolve the caller's role in a workspace, enforcing `required` when
/// given. Used directly by handlers and via [`SqlRoleResolver`] by the
/// query pipeline.
pub async fn require_workspace_role(
    pool: &SqlitePool,
    auth_disabled: bool,
    workspace_id: &str,
    user_id: &str,
    required: Option<WorkspaceRole>,
) -> Result<String, Error> {
    if auth_disabled {
        return Ok(WorkspaceRole::Admin.as_str().to_string());
    }

    if Uuid::parse_str(workspace_id).is_err() || Uuid::parse_str(user_id).is_err() {
        return Err(Error::validation("Invalid workspace or user id."));
    }

    let role: Option<String> = sqlx::query_scalar(
        "SELECT role FROM workspace_members WHERE workspace_id = ? AND user_id = ?",
    )
    .bind(workspace_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| Error::Store(e.to_string()))?;

    let role = role.ok_or_else(|| Error::forbidden("Workspace access denied."))?;
    if let Some(required) = required {
        if role != required.as_str() {
            return Err(Error::forbidden("Insufficient role."));
        }
    }
    Ok(role)
}

/// [`RoleResolver`] backed by the `workspace_members` table.
pub struct SqlRoleResolver {
    pool: SqlitePool,
    auth_disabled: bool,
}

impl SqlRoleResolver {
    pub fn new(pool: SqlitePool, auth_disabled: bool) -> Self {
        Self {
            pool,
            auth_disabled,
        }
    }
}

#[async_trait]
impl RoleResolver for SqlRoleResolver {
    async fn resolve_role(
        &self,
        workspace_id: &str,
        user_id: &str,
        required: Option<WorkspaceRole>,
    ) -> Result<String, Error> {
        require_workspace_role(&self.pool, self.auth_disabled, workspace_id, user_id, required)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_roundtrip() {
        let hashed = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hashed));
        assert!(!verify_password("wrong password", &hashed));
    }

    #[test]
    fn test_long_password_supported() {
        // Well past bcrypt's 72-byte limit; the pre-hash keeps it valid.
        let long = "x".repeat(200);
        let hashed = hash_password(&long).unwrap();
        assert!(verify_password(&long, &hashed));
    }

    #[test]
    fn test_malformed_hash_verifies_false() {
        assert!(!verify_password("anything", "not-a-bcrypt-hash"));
    }

    #[test]
    fn test_token_roundtrip() {
        let config = AuthConfig {
            disabled: false,
            secret: Some("test-secret".to_string()),
            token_exp_minutes: 60,
        };
        let token = create_access_token("user-1", "a@b.c", &config).unwrap();
        let claims = decode_token(&token, &config).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.email, "a@b.c");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_token_wrong_secret_rejected() {
        let config = AuthConfig {
            disabled: false,
            secret: Some("test-secret".to_string()),
            token_exp_minutes: 60,
        };
        let other = AuthConfig {
            disabled: false,
            secret: Some("other-secret".to_string()),
            token_exp_minutes: 60,
        };
        let token = create_access_token("user-1", "a@b.c", &config).unwrap();
        assert!(decode_token(&token, &other).is_none());
    }
}
