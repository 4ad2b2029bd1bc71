//! Authentication module
//!
//! HS256 tokens carrying the user id and email, plus the middleware that
//! guards the provisioning routes.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use wgkit_engine::CommandRunner;

use crate::handlers::{ApiError, AppState};
use crate::users::User;

/// Token lifetime in seconds (24 hours)
pub const TOKEN_LIFETIME_SECS: u64 = 86400;

/// JWT claims
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: u64,
    pub email: String,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// Signing and verification keys derived from one shared secret
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtKeys {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    /// Issue a token for `user`, valid for [`TOKEN_LIFETIME_SECS`]
    pub fn issue(&self, user: &User) -> Result<String, AuthError> {
        let now = unix_now();
        let claims = Claims {
            user_id: user.id,
            email: user.email.clone(),
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };

        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AuthError::TokenCreation(e.to_string()))
    }

    /// Validate a token and return its claims
    pub fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Token from an `Authorization` value, with or without the `Bearer ` prefix
pub fn token_from_header(value: &str) -> Option<&str> {
    let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    (!token.is_empty()).then_some(token)
}

/// Authentication middleware
///
/// On success the request carries the [`Claims`] as an extension.
pub async fn require_auth<R: CommandRunner>(
    State(state): State<Arc<AppState<R>>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or(ApiError::Unauthorized("No authorization header provided"))?
        .to_str()
        .map_err(|_| ApiError::Unauthorized("Invalid or expired token"))?;

    let token = token_from_header(header_value).ok_or(ApiError::Unauthorized("No token provided"))?;

    let claims = state.jwt.validate(token).map_err(|e| {
        tracing::warn!("Token verification failed: {}", e);
        ApiError::Unauthorized("Invalid or expired token")
    })?;

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Token creation error: {0}")]
    TokenCreation(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),
}
