//! The fixed error taxonomy and the verification-error classifier.
//!
//! Every failure a caller can observe is an [`AuthError`]: client-caused
//! faults carry HTTP 401 and a fixed message, infrastructure faults carry
//! HTTP 500. Raw library errors never leak except for the deliberate
//! transport pass-through in the key fetcher.

use axum_core::{
    body::Body,
    response::{IntoResponse, Response},
};
use http::{StatusCode, header};
use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use serde::{Deserialize, Serialize};

/// Errors raised while authenticating a request.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No Authorization header and no configured cookie carried a token.
    #[error("Missing Authorization HTTP header.")]
    MissingHeader,
    /// An Authorization header was present but not in `Bearer <token>` form.
    #[error("Authorization header should be in format: Bearer [token].")]
    MalformedHeader,
    /// The token's `exp` claim lies in the past.
    #[error("Expired token.")]
    ExpiredToken,
    /// The token declares an algorithm outside the verification policy.
    #[error("Unsupported token.")]
    UnsupportedAlgorithm,
    /// Signature mismatch, malformed segments, or a claim-policy violation.
    #[error("Invalid token.")]
    InvalidToken,
    /// The published key set definitively lacks the referenced key.
    #[error("No matching key found in the set.")]
    MissingKey,
    /// The key-set endpoint could not be fetched; the message is either the
    /// formatted HTTP failure or the verbatim transport error.
    #[error("{0}")]
    KeyFetchFailure(String),
    /// A policy invariant was violated at request time.
    #[error("{0}")]
    Configuration(String),
    /// Fallback for verification errors outside the classification table.
    #[error("{0}")]
    Unauthorized(String),
}

impl AuthError {
    /// The HTTP status this error maps to: 500 for infrastructure faults,
    /// 401 for everything the caller could remedy with a different token.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::KeyFetchFailure(_) | Self::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

/// Wire shape of a rejection body.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub status_code: u16,
    pub error: String,
    pub message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            status_code: status.as_u16(),
            error: status.canonical_reason().unwrap_or("Unknown").to_string(),
            message: self.to_string(),
        };
        let json = serde_json::to_string(&body).unwrap_or_default();

        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json))
            .unwrap_or_else(|_| status.into_response())
    }
}

/// One row of the verification-error classification table.
struct ClassificationRule {
    applies: fn(&ErrorKind) -> bool,
    classify: fn(&JwtError) -> AuthError,
}

/// Classification rules in evaluation order. The order is load-bearing:
/// expiry and algorithm faults sit above the malformed-token catch-all so
/// they keep their dedicated messages. Extending the mapping means
/// inserting a row, not touching [`classify_verification_error`].
static CLASSIFICATION_RULES: &[ClassificationRule] = &[
    ClassificationRule {
        applies: |kind| matches!(kind, ErrorKind::ExpiredSignature),
        classify: |_| AuthError::ExpiredToken,
    },
    ClassificationRule {
        applies: |kind| {
            matches!(
                kind,
                ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName
            )
        },
        classify: |_| AuthError::UnsupportedAlgorithm,
    },
    ClassificationRule {
        applies: |kind| {
            matches!(
                kind,
                ErrorKind::InvalidToken
                    | ErrorKind::InvalidSignature
                    | ErrorKind::ImmatureSignature
                    | ErrorKind::InvalidIssuer
                    | ErrorKind::InvalidAudience
                    | ErrorKind::InvalidSubject
                    | ErrorKind::MissingRequiredClaim(_)
                    | ErrorKind::Base64(_)
                    | ErrorKind::Json(_)
                    | ErrorKind::Utf8(_)
            )
        },
        classify: |_| AuthError::InvalidToken,
    },
];

/// Collapses a raised verification error into the fixed taxonomy.
///
/// Rules are tried top to bottom and the first match wins. Kinds outside
/// the table (undecodable key material, for example) fall back to a generic
/// 401 carrying the raw message.
pub(crate) fn classify_verification_error(err: &JwtError) -> AuthError {
    let kind = err.kind();
    for rule in CLASSIFICATION_RULES {
        if (rule.applies)(kind) {
            return (rule.classify)(err);
        }
    }
    AuthError::Unauthorized(err.to_string())
}
