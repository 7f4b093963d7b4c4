//! Token extraction and unverified decoding utilities.

use base64::Engine;
use http::HeaderMap;
use http::header::{AUTHORIZATION, COOKIE};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{config::Algorithm, error::AuthError};

/// Decoded-but-unverified token header fields used for key resolution.
#[derive(Debug, Clone)]
pub struct TokenHeader {
    /// Declared signing algorithm, already narrowed to the supported set.
    pub alg: Algorithm,
    /// Identifier of the published key that signed the token.
    pub kid: Option<String>,
    /// Declared token type, if any.
    pub typ: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawHeader {
    alg: Option<String>,
    kid: Option<String>,
    typ: Option<String>,
}

/// A token decoded without verification.
///
/// The signature segment is left in its base64url form; decoding never
/// touches keys, the network, or the clock.
#[derive(Debug, Clone, Serialize)]
pub struct DecodedToken {
    pub header: Value,
    pub payload: Value,
    pub signature: String,
}

/// Reads the bearer token from the request headers.
///
/// The Authorization header takes precedence and must be in `Bearer <token>`
/// form (case-sensitive scheme, whitespace-tolerant splitting). When it is
/// absent and a cookie name is configured, the named cookie is consulted
/// instead.
pub(crate) fn extract_token(
    headers: &HeaderMap,
    cookie_name: Option<&str>,
) -> Result<String, AuthError> {
    if let Some(value) = headers.get(AUTHORIZATION) {
        let value = value.to_str().map_err(|_| AuthError::MalformedHeader)?;
        let mut parts = value.split_whitespace();
        return match (parts.next(), parts.next(), parts.next()) {
            (Some("Bearer"), Some(token), None) => Ok(token.to_string()),
            _ => Err(AuthError::MalformedHeader),
        };
    }

    if let Some(name) = cookie_name {
        if let Some(token) = cookie_value(headers, name) {
            return Ok(token);
        }
    }

    Err(AuthError::MissingHeader)
}

/// Finds `name` across the request's `Cookie` headers. Empty values count as
/// absent.
fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for pair in raw.split(';') {
            if let Some((cookie, value)) = pair.trim().split_once('=') {
                if cookie == name && !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

/// Decodes the token's header segment without verifying anything.
///
/// Malformed segments classify as [`AuthError::InvalidToken`]; a parseable
/// header declaring anything but HS256/RS256 classifies as
/// [`AuthError::UnsupportedAlgorithm`], resolved here exactly once.
pub fn decode_token_header(token: &str) -> Result<TokenHeader, AuthError> {
    let [header, _, _] = segments(token)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|_| AuthError::InvalidToken)?;
    let header: RawHeader =
        serde_json::from_slice(&bytes).map_err(|_| AuthError::InvalidToken)?;

    let alg = header.alg.ok_or(AuthError::InvalidToken)?;
    let alg = Algorithm::from_header(&alg).ok_or(AuthError::UnsupportedAlgorithm)?;

    Ok(TokenHeader {
        alg,
        kid: header.kid,
        typ: header.typ,
    })
}

/// Decodes the payload claims without verification.
pub fn decode_payload(token: &str) -> Result<Value, AuthError> {
    let [_, payload, _] = segments(token)?;
    decode_json_segment(payload)
}

/// Decodes header, payload, and the raw signature segment without
/// verification.
pub fn decode_complete(token: &str) -> Result<DecodedToken, AuthError> {
    let [header, payload, signature] = segments(token)?;
    Ok(DecodedToken {
        header: decode_json_segment(header)?,
        payload: decode_json_segment(payload)?,
        signature: signature.to_string(),
    })
}

fn segments(token: &str) -> Result<[&str; 3], AuthError> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(signature), None) => Ok([header, payload, signature]),
        _ => Err(AuthError::InvalidToken),
    }
}

fn decode_json_segment(segment: &str) -> Result<Value, AuthError> {
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| AuthError::InvalidToken)?;
    serde_json::from_slice(&bytes).map_err(|_| AuthError::InvalidToken)
}
