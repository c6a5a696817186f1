//! Principal extraction.
//!
//! Tokens are issued by the separate auth service; this crate only verifies
//! them. A token may arrive as `Authorization: Bearer <jwt>` or in the
//! `accessToken` cookie set by the storefront.

pub mod rbac;

pub use rbac::{require_role, Role};

use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::errors::ServiceError;

/// Name of the cookie carrying the access token
pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";

/// Claim structure for access tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(alias = "userId", alias = "sub")]
    pub id: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: i64,
}

/// Authenticated principal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    pub role: Role,
    pub email: Option<String>,
}

impl AuthUser {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.id,
            role: claims.role,
            email: claims.email,
        }
    }
}

/// Authentication error types
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Please login to continue")]
    MissingToken,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        ServiceError::Unauthorized(err.to_string())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ServiceError::from(self).into_response()
    }
}

/// Verifies HS256 access tokens with the shared secret
#[derive(Clone)]
pub struct JwtVerifier {
    key: Arc<DecodingKey>,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 5;
        Self {
            key: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken,
            })
    }

    /// Resolves the principal from request headers
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<AuthUser, AuthError> {
        let token = token_from_headers(headers).ok_or(AuthError::MissingToken)?;
        self.verify(&token).map(AuthUser::from)
    }
}

/// Cookie first, then bearer header.
fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == ACCESS_TOKEN_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty());

    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
    })
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtVerifier: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }

        let verifier = JwtVerifier::from_ref(state);
        let user = verifier.authenticate(&parts.headers)?;
        parts.extensions.insert(user.clone());
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "unit_test_secret_for_order_service_tokens";

    fn token(claims: serde_json::Value) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn future_exp() -> i64 {
        chrono::Utc::now().timestamp() + 900
    }

    #[test]
    fn bearer_token_is_accepted() {
        let jwt = token(serde_json::json!({
            "id": "seller-1", "role": "seller", "email": "s@example.com", "exp": future_exp()
        }));
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {jwt}")).unwrap(),
        );

        let user = JwtVerifier::new(SECRET).authenticate(&headers).unwrap();
        assert_eq!(user.id, "seller-1");
        assert_eq!(user.role, Role::Seller);
        assert_eq!(user.email.as_deref(), Some("s@example.com"));
    }

    #[test]
    fn cookie_token_without_role_defaults_to_buyer() {
        let jwt = token(serde_json::json!({ "userId": "u-9", "exp": future_exp() }));
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("theme=dark; accessToken={jwt}")).unwrap(),
        );

        let user = JwtVerifier::new(SECRET).authenticate(&headers).unwrap();
        assert_eq!(user.id, "u-9");
        assert_eq!(user.role, Role::Buyer);
    }

    #[test]
    fn missing_wrong_and_expired_tokens_are_rejected() {
        let verifier = JwtVerifier::new(SECRET);
        assert_eq!(
            verifier.authenticate(&HeaderMap::new()),
            Err(AuthError::MissingToken)
        );

        let forged = encode(
            &Header::default(),
            &serde_json::json!({ "id": "x", "exp": future_exp() }),
            &EncodingKey::from_secret(b"some_other_secret"),
        )
        .unwrap();
        assert_eq!(verifier.verify(&forged).unwrap_err(), AuthError::InvalidToken);

        let expired = token(serde_json::json!({
            "id": "x", "exp": chrono::Utc::now().timestamp() - 3600
        }));
        assert_eq!(verifier.verify(&expired).unwrap_err(), AuthError::TokenExpired);
    }
}
