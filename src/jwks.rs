//! Remote key-set fetching and certificate handling.
//!
//! The fetcher resolves `(algorithm, key id)` pairs against a published
//! key-set document and records the outcome in the shared [`SecretCache`],
//! including a negative entry when the set definitively lacks the key.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    cache::{Lookup, SecretCache, SecretCacheKey},
    config::{Algorithm, ConfigError},
    error::AuthError,
};

/// Upper bound on a single key-set request.
pub(crate) const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// A published key-set document. Unknown fields are ignored and a missing
/// `keys` array is tolerated as empty.
#[derive(Debug, Deserialize)]
pub(crate) struct KeySet {
    #[serde(default)]
    pub(crate) keys: Vec<KeySetEntry>,
}

/// One key of the published set. Only the fields needed for selection and
/// conversion are modeled.
#[derive(Debug, Deserialize)]
pub(crate) struct KeySetEntry {
    #[serde(default)]
    pub(crate) alg: Option<String>,
    #[serde(default)]
    pub(crate) kid: Option<String>,
    #[serde(default)]
    pub(crate) x5c: Vec<String>,
}

/// Resolves verification-key material from a remote key-set document.
#[derive(Debug)]
pub(crate) struct KeyFetcher {
    url: String,
    domain: String,
    client: reqwest::Client,
    cache: Arc<SecretCache>,
}

impl KeyFetcher {
    pub(crate) fn new(
        url: String,
        domain: String,
        cache: Arc<SecretCache>,
    ) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(JWKS_FETCH_TIMEOUT)
            .build()
            .map_err(|err| ConfigError::HttpClient(err.to_string()))?;

        Ok(Self {
            url,
            domain,
            client,
            cache,
        })
    }

    /// Returns the PEM certificate for `(alg, kid)`, consulting the cache
    /// first and populating it after a fetch.
    ///
    /// A negative cache entry short-circuits to [`AuthError::MissingKey`]
    /// without touching the network.
    pub(crate) async fn fetch(
        &self,
        alg: Algorithm,
        kid: Option<&str>,
    ) -> Result<String, AuthError> {
        let key = SecretCacheKey::new(alg, kid, &self.domain);
        match self.cache.get(&key) {
            Lookup::Hit(material) => {
                debug!(key = %key.as_str(), "serving key material from cache");
                return Ok(material);
            }
            Lookup::Negative => {
                debug!(key = %key.as_str(), "cache confirms the key is absent");
                return Err(AuthError::MissingKey);
            }
            Lookup::Unknown => {}
        }

        debug!(url = %self.url, key = %key.as_str(), "fetching key set");
        let response = self.client.get(&self.url).send().await.map_err(|err| {
            warn!(url = %self.url, error = %err, "key-set request failed");
            AuthError::KeyFetchFailure(err.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(url = %self.url, status = %status, "key-set endpoint returned an error");
            return Err(AuthError::KeyFetchFailure(format!(
                "Unable to get the JWS due to a HTTP error: [HTTP {}] {}",
                status.as_u16(),
                body
            )));
        }

        let key_set: KeySet = response
            .json()
            .await
            .map_err(|err| AuthError::KeyFetchFailure(err.to_string()))?;

        match select_certificate(&key_set, alg, kid) {
            Some(certificate) => {
                let material = certificate_to_pem(certificate);
                self.cache.set(key, Some(material.clone()));
                Ok(material)
            }
            None => {
                debug!(key = %key.as_str(), "no matching key in the set, caching the absence");
                self.cache.set(key, None);
                Err(AuthError::MissingKey)
            }
        }
    }
}

/// Picks the first key matching the requested algorithm and key id and
/// returns its leaf certificate. An absent `kid` on both sides counts as a
/// match; entries without certificate material are skipped.
fn select_certificate<'a>(
    key_set: &'a KeySet,
    alg: Algorithm,
    kid: Option<&str>,
) -> Option<&'a str> {
    key_set.keys.iter().find_map(|entry| {
        let alg_matches = entry.alg.as_deref() == Some(alg.as_str());
        let kid_matches = entry.kid.as_deref() == kid;
        if alg_matches && kid_matches {
            entry.x5c.first().map(String::as_str)
        } else {
            None
        }
    })
}

/// Wraps a base64 certificate body in PEM delimiters, folding the body at
/// 64 characters per line.
pub(crate) fn certificate_to_pem(certificate: &str) -> String {
    let mut pem = String::with_capacity(certificate.len() + 64);
    pem.push_str("-----BEGIN CERTIFICATE-----\n");
    for chunk in certificate.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(chunk));
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}

const DER_SEQUENCE: u8 = 0x30;
const DER_INTEGER: u8 = 0x02;
const DER_BIT_STRING: u8 = 0x03;
const DER_CONTEXT_0: u8 = 0xA0;

/// Extracts the RSA modulus and exponent from a PEM certificate, returned
/// as base64url components ready for `DecodingKey::from_rsa_components`.
///
/// Walks the fixed path Certificate, tbsCertificate, subjectPublicKeyInfo,
/// RSAPublicKey; every field on the way is skipped structurally rather than
/// parsed.
pub(crate) fn rsa_components_from_pem(pem: &str) -> Result<(String, String), String> {
    let body: String = pem
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect();
    let der = base64::engine::general_purpose::STANDARD
        .decode(body.trim())
        .map_err(|err| format!("certificate is not valid base64: {err}"))?;

    let mut reader = DerReader::new(&der);
    reader.enter(DER_SEQUENCE)?; // Certificate
    reader.enter(DER_SEQUENCE)?; // tbsCertificate
    if reader.peek() == Some(DER_CONTEXT_0) {
        reader.skip()?; // explicit version tag
    }
    reader.skip()?; // serialNumber
    reader.skip()?; // signature algorithm
    reader.skip()?; // issuer
    reader.skip()?; // validity
    reader.skip()?; // subject
    reader.enter(DER_SEQUENCE)?; // subjectPublicKeyInfo
    reader.skip()?; // algorithm identifier
    let bit_string = reader.content(DER_BIT_STRING)?;
    let key_bytes = match bit_string.split_first() {
        Some((0, rest)) => rest,
        _ => return Err("malformed public-key bit string".to_string()),
    };

    let mut key = DerReader::new(key_bytes);
    key.enter(DER_SEQUENCE)?; // RSAPublicKey
    let n = key.content(DER_INTEGER)?;
    let e = key.content(DER_INTEGER)?;

    let engine = &base64::engine::general_purpose::URL_SAFE_NO_PAD;
    Ok((
        engine.encode(strip_leading_zero(n)),
        engine.encode(strip_leading_zero(e)),
    ))
}

/// Minimal DER reader covering the fixed layout of an RSA certificate:
/// definite-length SEQUENCE, INTEGER, BIT STRING, and the explicit version
/// tag. Not a general ASN.1 parser.
struct DerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DerReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(count)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| "truncated DER element".to_string())?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Reads a tag byte plus a definite length. Long-form lengths up to
    /// four bytes cover any certificate.
    fn header(&mut self) -> Result<(u8, usize), String> {
        let tag = self.take(1)?[0];
        let first = self.take(1)?[0];
        let length = if first & 0x80 == 0 {
            usize::from(first)
        } else {
            let count = usize::from(first & 0x7f);
            if count == 0 || count > 4 {
                return Err("unsupported DER length form".to_string());
            }
            let mut length = 0usize;
            for byte in self.take(count)? {
                length = (length << 8) | usize::from(*byte);
            }
            length
        };
        Ok((tag, length))
    }

    /// Expects `tag` and leaves the reader positioned on its content.
    fn enter(&mut self, tag: u8) -> Result<(), String> {
        let (found, _) = self.header()?;
        if found == tag {
            Ok(())
        } else {
            Err(format!("unexpected DER tag {found:#04x}, wanted {tag:#04x}"))
        }
    }

    /// Expects `tag` and returns its content bytes.
    fn content(&mut self, tag: u8) -> Result<&'a [u8], String> {
        let (found, length) = self.header()?;
        if found != tag {
            return Err(format!("unexpected DER tag {found:#04x}, wanted {tag:#04x}"));
        }
        self.take(length)
    }

    /// Skips one element of any tag.
    fn skip(&mut self) -> Result<(), String> {
        let (_, length) = self.header()?;
        self.take(length).map(|_| ())
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }
}

fn strip_leading_zero(bytes: &[u8]) -> &[u8] {
    match bytes.split_first() {
        Some((0, rest)) if !rest.is_empty() => rest,
        _ => bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CERT_B64: &str = "MIIDFzCCAf+gAwIBAgIUeWZep5y6HpRVuv9PhSNHyQWkVKcwDQYJKoZIhvcNAQELBQAwGjEYMBYGA1UEAwwPdGVzdC5hdXRoLmxvY2FsMCAXDTI2MDgyMzE4MDk0NFoYDzIxMjYwNzMwMTgwOTQ0WjAaMRgwFgYDVQQDDA90ZXN0LmF1dGgubG9jYWwwggEiMA0GCSqGSIb3DQEBAQUAA4IBDwAwggEKAoIBAQDEdUjYjrNlpVuEJKVlP4UjEKAolvUt8EKY3o/37GUSPxryRaIO2qWBtbcYFGEw6pi+yAx5tszbActNmaFELZo6lKTMZFdYfXtiDox+3Ksw9ZCHv5pPk9pMLbQO/vEB5hPPWs8bzXOInAXKAjlp9DHoiAAEY8pjB/gTbAOMfRS9XkK9RnGtPKY0WdW1DMtD6IKm89a7B1LtS2KggcNDkiiNN9D7/oLbgMYV14M5F0fZQhviSTOnJ6ETBy8CRzSZuo6QZyN6Od3ghSBlDqqwBxzcj9H5LqRtNlLqNGph5MVXa4oowDXVeq8JNk4XwffVEHdmf4XGnnsL6lB/mtUvPTE3AgMBAAGjUzBRMB0GA1UdDgQWBBTNduwil6kO6w6p5qMmqsbGV1TeEDAfBgNVHSMEGDAWgBTNduwil6kO6w6p5qMmqsbGV1TeEDAPBgNVHRMBAf8EBTADAQH/MA0GCSqGSIb3DQEBCwUAA4IBAQCyf6hkCA41s/mup5mJNOERoPF++gdy28M73/M6XWqoObAeoxBqtgITcDzBX9TCn2byWLhC/IRHiWoGi932NJqPGvqrwr0PatGz4MiqzOUiEzJGd6FRHBw/IjRHFyGSXm8Xaq8qC+umdixzle9r4ppsWl9g2VI7VfOChb0sVCBUXk4TUN7LSrM6rRwkmJDmI1a+s4a87leHk4Oy3vB8whDYnJhAf8p4K00L/DgogG3LkBGWmF5V2MDqXLAesqprgzYKVrJlG+Dm3i2aZzNpKl6aIzjF5hXS64iEsjW3JGLVfYOsFTXBGPr6fdvfgO9FpBazDRW+zFarAKEpQcsgQy3r";

    const EXPECTED_N: &str = "xHVI2I6zZaVbhCSlZT-FIxCgKJb1LfBCmN6P9-xlEj8a8kWiDtqlgbW3GBRhMOqYvsgMebbM2wHLTZmhRC2aOpSkzGRXWH17Yg6MftyrMPWQh7-aT5PaTC20Dv7xAeYTz1rPG81ziJwFygI5afQx6IgABGPKYwf4E2wDjH0UvV5CvUZxrTymNFnVtQzLQ-iCpvPWuwdS7UtioIHDQ5IojTfQ-_6C24DGFdeDORdH2UIb4kkzpyehEwcvAkc0mbqOkGcjejnd4IUgZQ6qsAcc3I_R-S6kbTZS6jRqYeTFV2uKKMA11XqvCTZOF8H31RB3Zn-Fxp57C-pQf5rVLz0xNw";

    fn fetcher(url: String, ttl: Duration) -> KeyFetcher {
        let cache = Arc::new(SecretCache::new(ttl));
        KeyFetcher::new(url, "https://test.auth.local/".to_string(), cache).unwrap()
    }

    fn key_set_body() -> serde_json::Value {
        json!({
            "keys": [
                { "alg": "RS256", "kid": "KEY", "x5c": [CERT_B64] }
            ]
        })
    }

    #[test]
    fn test_key_set_tolerates_missing_fields() {
        let key_set: KeySet = serde_json::from_value(json!({})).unwrap();
        assert!(key_set.keys.is_empty());

        let key_set: KeySet = serde_json::from_value(json!({ "keys": [{}] })).unwrap();
        assert_eq!(key_set.keys.len(), 1);
        assert_eq!(key_set.keys[0].alg, None);
        assert_eq!(key_set.keys[0].kid, None);
        assert!(key_set.keys[0].x5c.is_empty());
    }

    #[test]
    fn test_select_certificate_matches_alg_and_kid() {
        let key_set: KeySet = serde_json::from_value(json!({
            "keys": [
                { "alg": "RS512", "kid": "KEY", "x5c": ["other"] },
                { "alg": "RS256", "kid": "OTHER", "x5c": ["other"] },
                { "alg": "RS256", "kid": "KEY", "x5c": ["wanted"] }
            ]
        }))
        .unwrap();

        let certificate = select_certificate(&key_set, Algorithm::RS256, Some("KEY"));
        assert_eq!(certificate, Some("wanted"));
    }

    #[test]
    fn test_select_certificate_matches_absent_kid() {
        let key_set: KeySet = serde_json::from_value(json!({
            "keys": [
                { "alg": "RS256", "kid": "KEY", "x5c": ["keyed"] },
                { "alg": "RS256", "x5c": ["unkeyed"] }
            ]
        }))
        .unwrap();

        assert_eq!(
            select_certificate(&key_set, Algorithm::RS256, None),
            Some("unkeyed")
        );
        assert_eq!(
            select_certificate(&key_set, Algorithm::RS256, Some("MISSING")),
            None
        );
    }

    #[test]
    fn test_select_certificate_skips_entries_without_material() {
        let key_set: KeySet = serde_json::from_value(json!({
            "keys": [
                { "alg": "RS256", "kid": "KEY", "x5c": [] },
                { "alg": "RS256", "kid": "KEY", "x5c": ["fallback"] }
            ]
        }))
        .unwrap();

        let certificate = select_certificate(&key_set, Algorithm::RS256, Some("KEY"));
        assert_eq!(certificate, Some("fallback"));
    }

    #[test]
    fn test_certificate_to_pem_folds_at_64_characters() {
        let pem = certificate_to_pem(&"A".repeat(130));
        let lines: Vec<&str> = pem.lines().collect();

        assert_eq!(lines[0], "-----BEGIN CERTIFICATE-----");
        assert_eq!(lines[1].len(), 64);
        assert_eq!(lines[2].len(), 64);
        assert_eq!(lines[3], "AA");
        assert_eq!(lines[4], "-----END CERTIFICATE-----");
    }

    #[test]
    fn test_rsa_components_from_pem() {
        let (n, e) = rsa_components_from_pem(&certificate_to_pem(CERT_B64)).unwrap();
        assert_eq!(n, EXPECTED_N);
        assert_eq!(e, "AQAB");
    }

    #[test]
    fn test_rsa_components_rejects_garbage() {
        assert!(rsa_components_from_pem("not a certificate").is_err());

        let pem = certificate_to_pem(&base64::engine::general_purpose::STANDARD.encode("junk"));
        assert!(rsa_components_from_pem(&pem).is_err());
    }

    #[tokio::test]
    async fn test_fetch_caches_positive_material() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(key_set_body()))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = fetcher(
            format!("{}/.well-known/jwks.json", server.uri()),
            Duration::from_secs(60),
        );

        let first = fetcher.fetch(Algorithm::RS256, Some("KEY")).await.unwrap();
        let second = fetcher.fetch(Algorithm::RS256, Some("KEY")).await.unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("-----BEGIN CERTIFICATE-----"));
    }

    #[tokio::test]
    async fn test_fetch_caches_missing_keys() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(key_set_body()))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = fetcher(
            format!("{}/.well-known/jwks.json", server.uri()),
            Duration::from_secs(60),
        );

        let first = fetcher.fetch(Algorithm::RS256, Some("UNKNOWN")).await;
        assert!(matches!(first, Err(AuthError::MissingKey)));

        // Second lookup is answered by the negative entry, not the server.
        let second = fetcher.fetch(Algorithm::RS256, Some("UNKNOWN")).await;
        assert!(matches!(second, Err(AuthError::MissingKey)));
    }

    #[tokio::test]
    async fn test_fetch_reports_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let fetcher = fetcher(
            format!("{}/.well-known/jwks.json", server.uri()),
            Duration::from_secs(60),
        );

        let result = fetcher.fetch(Algorithm::RS256, Some("KEY")).await;
        match result {
            Err(AuthError::KeyFetchFailure(message)) => {
                assert_eq!(
                    message,
                    "Unable to get the JWS due to a HTTP error: [HTTP 500] boom"
                );
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_with_zero_ttl_hits_the_server_every_time() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(key_set_body()))
            .expect(2)
            .mount(&server)
            .await;

        let fetcher = fetcher(
            format!("{}/.well-known/jwks.json", server.uri()),
            Duration::ZERO,
        );

        fetcher.fetch(Algorithm::RS256, Some("KEY")).await.unwrap();
        fetcher.fetch(Algorithm::RS256, Some("KEY")).await.unwrap();
    }
}
