//! In-memory cache implementation using standard library types.

use std::{
    collections::HashMap,
    sync::{
        RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use super::{Lookup, SecretCacheKey};

/// Time-bounded store for resolved key material with negative caching.
///
/// One implementation serves both cache modes: a zero TTL disables the cache
/// entirely (`get` reports [`Lookup::Unknown`], `set` is a no-op), degrading
/// it to a passthrough that forces a fetch on every request. Expired entries
/// are pruned lazily during reads; there is no background sweeper, so the
/// cache never holds the process open at shutdown.
#[derive(Debug)]
pub struct SecretCache {
    storage: RwLock<HashMap<SecretCacheKey, CacheEntry>>,
    ttl: Duration,
    enabled: bool,
    closed: AtomicBool,
}

/// Internal cache entry; `None` material means "confirmed absent".
#[derive(Debug, Clone)]
struct CacheEntry {
    material: Option<String>,
    expires_at: Instant,
}

impl SecretCache {
    /// Creates a cache whose entries expire after `ttl`. A zero `ttl`
    /// disables caching.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            storage: RwLock::new(HashMap::new()),
            ttl,
            enabled: !ttl.is_zero(),
            closed: AtomicBool::new(false),
        }
    }

    fn active(&self) -> bool {
        self.enabled && !self.closed.load(Ordering::Acquire)
    }

    /// Looks up key material for `key`.
    #[must_use]
    pub fn get(&self, key: &SecretCacheKey) -> Lookup {
        if !self.active() {
            return Lookup::Unknown;
        }
        self.cleanup_expired();

        self.storage.read().map_or(Lookup::Unknown, |storage| {
            let live = storage
                .get(key)
                .filter(|entry| entry.expires_at > Instant::now());
            match live {
                Some(entry) => match &entry.material {
                    Some(material) => Lookup::Hit(material.clone()),
                    None => Lookup::Negative,
                },
                None => Lookup::Unknown,
            }
        })
    }

    /// Stores key material (or the `None` negative sentinel) under `key`.
    pub fn set(&self, key: SecretCacheKey, material: Option<String>) {
        if !self.active() {
            return;
        }
        if let Ok(mut storage) = self.storage.write() {
            let entry = CacheEntry {
                material,
                expires_at: Instant::now() + self.ttl,
            };
            storage.insert(key, entry);
        }
    }

    /// Evicts every entry and marks the cache closed, after which `get`
    /// reports [`Lookup::Unknown`] and `set` is a no-op. Idempotent; safe to
    /// call during shutdown even when the cache is empty.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Ok(mut storage) = self.storage.write() {
            storage.clear();
        }
    }

    /// Removes expired entries during reads to keep the map small without a
    /// cleanup thread.
    fn cleanup_expired(&self) {
        if let Ok(mut storage) = self.storage.write() {
            let now = Instant::now();
            storage.retain(|_, entry| entry.expires_at > now);
        }
    }
}
