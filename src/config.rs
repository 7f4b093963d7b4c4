//! Configuration types and option resolution for JWT authentication.

use std::{fmt, sync::Arc, time::Duration};

use regex::Regex;
use serde_json::Value;
use url::Url;

/// Default TTL for cached key material (one week).
pub const DEFAULT_SECRETS_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Signing algorithms this crate verifies.
///
/// The allowed set is derived from the configured key sources and carried
/// through key resolution as a tagged value, resolved once while inspecting
/// the token header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// HMAC-SHA256 against the configured secret.
    HS256,
    /// RSA-SHA256 against a key published in the remote key set.
    RS256,
}

impl Algorithm {
    /// Maps a token header's `alg` value; anything but the two supported
    /// algorithms is `None`.
    pub(crate) fn from_header(alg: &str) -> Option<Self> {
        match alg {
            "HS256" => Some(Self::HS256),
            "RS256" => Some(Self::RS256),
            _ => None,
        }
    }

    /// Returns the canonical `alg` value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::RS256 => "RS256",
        }
    }

    pub(crate) fn jwt_algorithm(self) -> jsonwebtoken::Algorithm {
        match self {
            Self::HS256 => jsonwebtoken::Algorithm::HS256,
            Self::RS256 => jsonwebtoken::Algorithm::RS256,
        }
    }
}

/// Expected token issuer: an exact value or a pattern the `iss` claim must
/// match.
#[derive(Debug, Clone)]
pub enum Issuer {
    Exact(String),
    Pattern(Regex),
}

impl Issuer {
    pub(crate) fn matches(&self, iss: &str) -> bool {
        match self {
            Self::Exact(expected) => expected == iss,
            Self::Pattern(pattern) => pattern.is_match(iss),
        }
    }
}

impl From<&str> for Issuer {
    fn from(value: &str) -> Self {
        Self::Exact(value.to_string())
    }
}

impl From<String> for Issuer {
    fn from(value: String) -> Self {
        Self::Exact(value)
    }
}

impl From<Regex> for Issuer {
    fn from(pattern: Regex) -> Self {
        Self::Pattern(pattern)
    }
}

/// Expected token audience.
#[derive(Debug, Clone)]
pub enum Audience {
    /// The token's `aud` claim must contain exactly this value.
    Single(String),
    /// The token's `aud` claim must intersect these values.
    Multiple(Vec<String>),
    /// Expect the normalized domain URL as the audience. With no domain
    /// configured this degrades to "not checked".
    Domain,
}

/// Cookie-based token extraction settings.
#[derive(Debug, Clone)]
pub struct CookieOptions {
    /// Name of the cookie holding the raw token.
    pub cookie_name: String,
    /// Whether the host's cookie layer signs this cookie. Signed values must
    /// be unwrapped before they reach the gate; the flag is carried so hosts
    /// can wire their cookie layer accordingly.
    pub signed: bool,
}

/// Transform applied to the verified claims before they are exposed.
pub type FormatUser = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// User-supplied configuration.
///
/// Construct with struct-update syntax and resolve into the immutable
/// [`VerificationPolicy`]:
///
/// ```
/// use axum_jwt_verify::AuthenticationOptions;
///
/// let policy = AuthenticationOptions {
///     domain: Some("tenant.example.com".to_string()),
///     ..Default::default()
/// }
/// .resolve()
/// .unwrap();
/// assert_eq!(
///     policy.jwks_url(),
///     Some("https://tenant.example.com/.well-known/jwks.json")
/// );
/// ```
#[derive(Clone, Default)]
pub struct AuthenticationOptions {
    /// Tenant base URL publishing the key set. Scheme defaults to `https`.
    pub domain: Option<String>,
    /// Explicit key-set URL; derived from `domain` when absent.
    pub jwks_url: Option<String>,
    /// Symmetric secret for HS256 tokens.
    pub secret: Option<String>,
    /// Expected audience; unset means the `aud` claim is not checked.
    pub audience: Option<Audience>,
    /// Expected issuers; empty defaults to the domain URL when one is
    /// configured, otherwise the `iss` claim is not checked.
    pub issuer: Vec<Issuer>,
    /// Present only to be rejected: the allowed algorithms are derived from
    /// the configured key sources and cannot be set directly.
    pub algorithms: Option<Vec<Algorithm>>,
    /// Expose `{header, payload, signature}` instead of the payload alone.
    pub complete: bool,
    /// TTL for cached key material. Defaults to [`DEFAULT_SECRETS_TTL`];
    /// zero disables caching.
    pub secrets_ttl: Option<Duration>,
    /// Read the token from this cookie when the Authorization header is
    /// absent.
    pub cookie: Option<CookieOptions>,
    /// Transform applied to the verified claims before exposure.
    pub format_user: Option<FormatUser>,
}

impl fmt::Debug for AuthenticationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationOptions")
            .field("domain", &self.domain)
            .field("jwks_url", &self.jwks_url)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("audience", &self.audience)
            .field("issuer", &self.issuer)
            .field("algorithms", &self.algorithms)
            .field("complete", &self.complete)
            .field("secrets_ttl", &self.secrets_ttl)
            .field("cookie", &self.cookie)
            .field("format_user", &self.format_user.is_some())
            .finish()
    }
}

impl AuthenticationOptions {
    /// Validates the options and derives the verification policy.
    pub fn resolve(self) -> Result<VerificationPolicy, ConfigError> {
        if self.algorithms.is_some() {
            return Err(ConfigError::AlgorithmsNotSupported);
        }
        if self.domain.is_none() && self.jwks_url.is_none() && self.secret.is_none() {
            return Err(ConfigError::MissingOptions);
        }

        let domain = match &self.domain {
            Some(raw) => Some(normalize_domain(raw)?),
            None => None,
        };
        let jwks_url = match self.jwks_url {
            Some(url) => Some(url),
            None => domain.as_ref().map(|d| format!("{d}.well-known/jwks.json")),
        };

        let issuers = if self.issuer.is_empty() {
            domain.iter().cloned().map(Issuer::Exact).collect()
        } else {
            self.issuer
        };
        let audiences = match self.audience {
            Some(Audience::Single(value)) => vec![value],
            Some(Audience::Multiple(values)) => values,
            Some(Audience::Domain) => domain.iter().cloned().collect(),
            None => Vec::new(),
        };

        // RS256 iff a key-set source exists, HS256 iff a secret exists.
        let mut algorithms = Vec::new();
        if jwks_url.is_some() {
            algorithms.push(Algorithm::RS256);
        }
        if self.secret.is_some() {
            algorithms.push(Algorithm::HS256);
        }

        Ok(VerificationPolicy {
            jwks_url,
            domain,
            secret: self.secret,
            issuers,
            audiences,
            algorithms,
            complete: self.complete,
            cookie_name: self.cookie.map(|c| c.cookie_name),
            secrets_ttl: self.secrets_ttl.unwrap_or(DEFAULT_SECRETS_TTL),
            format_user: self.format_user,
        })
    }
}

/// Normalizes a domain to an absolute URL with a trailing slash, so that
/// joining the well-known suffix never clobbers a path segment.
fn normalize_domain(raw: &str) -> Result<String, ConfigError> {
    let with_scheme = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    let url = Url::parse(&with_scheme)
        .map_err(|e| ConfigError::InvalidDomain(format!("{with_scheme}: {e}")))?;
    let mut normalized = url.to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Ok(normalized)
}

/// Resolved verification policy: created once at startup, immutable
/// afterward, read by every request.
#[derive(Clone)]
pub struct VerificationPolicy {
    pub(crate) jwks_url: Option<String>,
    pub(crate) domain: Option<String>,
    pub(crate) secret: Option<String>,
    pub(crate) issuers: Vec<Issuer>,
    pub(crate) audiences: Vec<String>,
    pub(crate) algorithms: Vec<Algorithm>,
    pub(crate) complete: bool,
    pub(crate) cookie_name: Option<String>,
    pub(crate) secrets_ttl: Duration,
    pub(crate) format_user: Option<FormatUser>,
}

impl VerificationPolicy {
    /// Allowed signing algorithms, derived from the configured key sources:
    /// `RS256` for a key-set source, `HS256` for a secret, in that order.
    #[must_use]
    pub fn algorithms(&self) -> &[Algorithm] {
        &self.algorithms
    }

    /// Resolved key-set URL, if a remote key source is configured.
    #[must_use]
    pub fn jwks_url(&self) -> Option<&str> {
        self.jwks_url.as_deref()
    }

    /// Normalized domain URL, if configured.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// TTL applied to cached key material; zero disables caching.
    #[must_use]
    pub fn secrets_ttl(&self) -> Duration {
        self.secrets_ttl
    }
}

impl fmt::Debug for VerificationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationPolicy")
            .field("jwks_url", &self.jwks_url)
            .field("domain", &self.domain)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("issuers", &self.issuers)
            .field("audiences", &self.audiences)
            .field("algorithms", &self.algorithms)
            .field("complete", &self.complete)
            .field("cookie_name", &self.cookie_name)
            .field("secrets_ttl", &self.secrets_ttl)
            .field("format_user", &self.format_user.is_some())
            .finish()
    }
}

/// Errors raised while resolving [`AuthenticationOptions`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Please provide at least one of the \"domain\" or \"secret\" options.")]
    MissingOptions,
    #[error("Option \"algorithms\" is not supported.")]
    AlgorithmsNotSupported,
    #[error("Invalid domain: {0}")]
    InvalidDomain(String),
    #[error("Failed to build the key-set HTTP client: {0}")]
    HttpClient(String),
}
