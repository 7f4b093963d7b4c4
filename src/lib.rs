//! JWT authentication for axum services.
//!
//! Verifies bearer tokens against either a locally configured HS256 secret
//! or RS256 keys published in a remote key set, with a TTL-bounded cache
//! that also remembers confirmed-missing keys. Failures collapse into a
//! fixed taxonomy rendered as JSON: 401 for anything the caller could fix
//! with a different token, 500 for infrastructure faults.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use axum::{Router, routing::get};
//! use axum_jwt_verify::{
//!     AuthUser, AuthenticationOptions, JwtAuthenticationLayer, JwtVerifier,
//! };
//!
//! # fn main() -> Result<(), axum_jwt_verify::ConfigError> {
//! let verifier = Arc::new(JwtVerifier::new(AuthenticationOptions {
//!     domain: Some("tenant.auth.example.com".to_string()),
//!     ..Default::default()
//! })?);
//!
//! let app: Router = Router::new()
//!     .route(
//!         "/me",
//!         get(|AuthUser(claims): AuthUser| async move { claims.to_string() }),
//!     )
//!     .layer(JwtAuthenticationLayer::new(verifier));
//! # Ok(())
//! # }
//! ```

use axum_core::extract::FromRequestParts;
use http::request::Parts;
use serde_json::Value;

pub mod cache;
pub mod config;
pub mod error;
mod jwks;
pub mod layer;
pub mod token;
pub mod validation;

pub use config::{
    Algorithm, Audience, AuthenticationOptions, ConfigError, CookieOptions, DEFAULT_SECRETS_TTL,
    FormatUser, Issuer, VerificationPolicy,
};
pub use error::{AuthError, ErrorBody};
pub use layer::{JwtAuthenticationLayer, JwtAuthenticationService};
pub use token::{DecodedToken, TokenHeader, decode_complete, decode_payload};
pub use validation::JwtVerifier;

/// Verified claims of the current request, inserted by
/// [`JwtAuthenticationLayer`] and extracted in handlers.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuthUser(pub Value);

impl<S: Sync> FromRequestParts<S> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<AuthUser>().cloned().ok_or_else(|| {
            AuthError::Configuration(
                "verified claims not found in request extensions; is the authentication layer installed?"
                    .to_string(),
            )
        })
    }
}

/// The raw bearer token of the current request, read from the Authorization
/// header without any verification.
///
/// Pair with [`decode_payload`] or [`decode_complete`] on routes that only
/// need to look inside a token.
#[derive(Debug, Clone)]
pub struct RawToken(pub String);

impl<S: Sync> FromRequestParts<S> for RawToken {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        token::extract_token(&parts.headers, None).map(RawToken)
    }
}
