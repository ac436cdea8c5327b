//! The advisory result cache.
//!
//! Every operation here is infallible from the caller's point of view: if the
//! backing store is missing or failing, `get` misses and `set`/`invalidate`
//! are dropped. Callers may rely on the cache for latency, never for
//! correctness.

use std::collections::HashMap;
use std::sync::Arc;

use super::config::CacheConfig;
use super::key::{cache_key, KeyClass};
use super::store::{CacheRecord, CacheStats, CacheStore, SqliteCacheStore};

/// Default bound on normalized key length.
pub const DEFAULT_MAX_KEY_LEN: usize = 200;

// ─── Clock ───────────────────────────────────────────────────────────────────

/// Source of "now" in unix milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

// ─── ResultCache ─────────────────────────────────────────────────────────────

/// Process-wide cache of capability results, shared via `Arc`.
///
/// Every method blocks on the store. Async callers go through
/// `tokio::task::spawn_blocking`.
pub struct ResultCache {
    store: Option<Arc<dyn CacheStore>>,
    clock: Arc<dyn Clock>,
    max_key_len: usize,
    ttl_days: HashMap<KeyClass, u32>,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store: Some(store),
            clock: Arc::new(SystemClock),
            max_key_len: DEFAULT_MAX_KEY_LEN,
            ttl_days: HashMap::new(),
        }
    }

    /// A cache with no backing store: every read misses.
    pub fn disabled() -> Self {
        Self {
            store: None,
            clock: Arc::new(SystemClock),
            max_key_len: DEFAULT_MAX_KEY_LEN,
            ttl_days: HashMap::new(),
        }
    }

    /// Build from config, opening the SQLite store.
    ///
    /// A store that cannot be opened yields a disabled cache, not an error.
    pub fn from_config(config: &CacheConfig) -> Self {
        let base = if !config.enabled {
            tracing::info!("result cache disabled by config");
            Self::disabled()
        } else {
            match config.resolved_path() {
                Some(path) => match SqliteCacheStore::open_path(&path) {
                    Ok(store) => {
                        tracing::info!(path = %path.display(), "result cache opened");
                        Self::new(Arc::new(store))
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "result cache unavailable, continuing without it");
                        Self::disabled()
                    }
                },
                None => {
                    tracing::warn!("no data directory for result cache, continuing without it");
                    Self::disabled()
                }
            }
        };

        let mut cache = base.with_max_key_len(config.max_key_len);
        cache.ttl_days.extend(config.ttl_days.iter().map(|(k, v)| (*k, *v)));
        cache
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_max_key_len(mut self, max_key_len: usize) -> Self {
        self.max_key_len = max_key_len;
        self
    }

    /// Override the TTL for one key class.
    pub fn with_ttl(mut self, class: KeyClass, days: u32) -> Self {
        self.ttl_days.insert(class, days);
        self
    }

    pub fn is_available(&self) -> bool {
        self.store.is_some()
    }

    pub fn ttl_for(&self, class: KeyClass) -> u32 {
        self.ttl_days
            .get(&class)
            .copied()
            .unwrap_or_else(|| class.default_ttl_days())
    }

    fn key(&self, class: KeyClass, raw_key: &str) -> String {
        cache_key(class, raw_key, self.max_key_len)
    }

    /// Return the payload of a live entry.
    ///
    /// An expired entry found here is deleted before reporting the miss.
    pub fn get(&self, class: KeyClass, raw_key: &str) -> Option<serde_json::Value> {
        let store = self.store.as_ref()?;
        let key = self.key(class, raw_key);
        let now = self.clock.now_ms();

        let record = match store.get(&key) {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::debug!(%key, "cache miss");
                return None;
            }
            Err(e) => {
                tracing::debug!(%key, error = %e, "cache read failed, treating as miss");
                return None;
            }
        };

        if !record.is_live(now) {
            tracing::debug!(%key, "cache entry expired");
            if let Err(e) = store.delete_if_expired(&key, now) {
                tracing::debug!(%key, error = %e, "failed to delete expired entry");
            }
            return None;
        }

        match store.record_hit(&key, now) {
            Ok(false) => {
                // Replaced or expired between read and update.
                None
            }
            Ok(true) => {
                tracing::debug!(%key, hits = record.hit_count + 1, "cache hit");
                Some(record.content)
            }
            Err(e) => {
                tracing::debug!(%key, error = %e, "hit count update failed");
                Some(record.content)
            }
        }
    }

    /// Insert or replace an entry with a zero hit count.
    pub fn set(
        &self,
        class: KeyClass,
        raw_key: &str,
        payload: &serde_json::Value,
        ttl_override: Option<u32>,
    ) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let now = self.clock.now_ms();
        let record = CacheRecord {
            key: self.key(class, raw_key),
            key_type: class.as_str().to_string(),
            search_term: raw_key.to_string(),
            content: payload.clone(),
            created_at: now,
            ttl_days: ttl_override.unwrap_or_else(|| self.ttl_for(class)),
            hit_count: 0,
            last_accessed: now,
        };
        match store.upsert(&record) {
            Ok(()) => tracing::debug!(key = %record.key, ttl_days = record.ttl_days, "cache set"),
            Err(e) => tracing::debug!(key = %record.key, error = %e, "cache write dropped"),
        }
    }

    /// Delete an entry unconditionally.
    pub fn invalidate(&self, class: KeyClass, raw_key: &str) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let key = self.key(class, raw_key);
        if let Err(e) = store.delete(&key) {
            tracing::debug!(%key, error = %e, "cache invalidate dropped");
        }
    }

    /// Delete every expired entry, returning how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let Some(store) = self.store.as_ref() else {
            return 0;
        };
        match store.delete_expired(self.clock.now_ms()) {
            Ok(removed) => {
                tracing::info!(removed, "cache sweep complete");
                removed
            }
            Err(e) => {
                tracing::warn!(error = %e, "cache sweep failed");
                0
            }
        }
    }

    /// Entry count and total hits; zeros when unavailable.
    pub fn stats(&self) -> CacheStats {
        self.store
            .as_ref()
            .and_then(|store| store.stats().ok())
            .unwrap_or_default()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
