//! Tri-state caching of resolved key material.
//!
//! Remote key lookups are cached positively (material found) and negatively
//! (key confirmed missing), so repeated requests for the same key avoid
//! repeated network fetches until the TTL elapses.

use crate::config::Algorithm;

pub mod memory;

pub use memory::SecretCache;

/// Result of a cache lookup.
///
/// Distinguishes "fetched and confirmed missing" from "never looked up": a
/// negative entry must fail fast without a network call, while an unknown
/// one triggers a fresh fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Resolved key material.
    Hit(String),
    /// The upstream key set was fetched and definitively lacks this key.
    Negative,
    /// Never looked up, or the previous entry expired.
    Unknown,
}

/// Type-safe cache key partitioning entries by algorithm, key id, and the
/// key-set domain.
///
/// Prevents accidentally mixing key material across verification policies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretCacheKey(String);

impl SecretCacheKey {
    /// Creates a cache key from the token header values and the domain the
    /// key set belongs to. A token without a `kid` keys on the empty string,
    /// mirroring key-set entries published without one.
    #[must_use]
    pub fn new(algorithm: Algorithm, key_id: Option<&str>, domain: &str) -> Self {
        Self(format!(
            "{}:{}:{}",
            algorithm.as_str(),
            key_id.unwrap_or_default(),
            domain
        ))
    }

    /// Returns the cache key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
