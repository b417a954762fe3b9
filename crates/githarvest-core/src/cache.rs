use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::Result;

/// Cache key for one upstream request: source label, canonical query params
/// and page cursor, hashed so keys stay fixed-width regardless of query size.
pub fn fingerprint(source: &str, params: &str, cursor: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(params.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(cursor.as_bytes());
    hex::encode(hasher.finalize())
}

/// Slow cache tier. Implementations decide durability and expiry; an expired
/// entry must read back as a miss.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: &str) -> Result<()>;
}

#[async_trait]
impl CacheStore for Box<dyn CacheStore> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.as_ref().get(key).await
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.as_ref().put(key, value).await
    }
}

/// Tiered cache over a boxed store, for callers that pick the slow tier at
/// runtime.
pub type SharedCache = TieredCache<Box<dyn CacheStore>>;

/// Store that caches nothing. Keeps the tiered cache usable without a
/// database (dry runs, tests).
pub struct NoopStore;

#[async_trait]
impl CacheStore for NoopStore {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn put(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }
}

struct FastEntry {
    value: String,
    last_access: u64,
}

struct FastTier {
    entries: HashMap<String, FastEntry>,
    clock: u64,
}

impl FastTier {
    fn touch(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_access)
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

/// Two-tier read-through cache: a bounded in-process LRU map in front of a
/// `CacheStore`. Store hits are promoted into the fast tier; fast-tier
/// eviction never touches the store.
pub struct TieredCache<S: CacheStore> {
    fast: Mutex<FastTier>,
    capacity: usize,
    store: S,
}

impl<S: CacheStore> TieredCache<S> {
    pub fn new(capacity: usize, store: S) -> Self {
        Self {
            fast: Mutex::new(FastTier {
                entries: HashMap::new(),
                clock: 0,
            }),
            capacity: capacity.max(1),
            store,
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(value) = self.fast_get(key) {
            return Ok(Some(value));
        }

        match self.store.get(key).await? {
            Some(value) => {
                debug!(key, "cache hit promoted from slow tier");
                self.fast_put(key, &value);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.fast_put(key, value);
        self.store.put(key, value).await
    }

    fn fast_get(&self, key: &str) -> Option<String> {
        let mut fast = self.fast.lock().unwrap_or_else(|e| e.into_inner());
        let stamp = fast.touch();
        let entry = fast.entries.get_mut(key)?;
        entry.last_access = stamp;
        Some(entry.value.clone())
    }

    fn fast_put(&self, key: &str, value: &str) {
        let mut fast = self.fast.lock().unwrap_or_else(|e| e.into_inner());
        let stamp = fast.touch();
        if !fast.entries.contains_key(key) && fast.entries.len() >= self.capacity {
            fast.evict_oldest();
        }
        fast.entries.insert(
            key.to_string(),
            FastEntry {
                value: value.to_string(),
                last_access: stamp,
            },
        );
    }

    #[cfg(test)]
    fn fast_len(&self) -> usize {
        self.fast.lock().unwrap().entries.len()
    }
}
