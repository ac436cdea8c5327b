//! Cache backing store.
//!
//! `CacheStore` is a key/value store with conditional TTL semantics. The
//! SQLite implementation uses `rusqlite` in synchronous mode behind a mutex;
//! WAL mode is enabled so several processes can share one cache file.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use super::errors::CacheError;

/// Milliseconds in one day.
pub const DAY_MS: i64 = 86_400_000;

/// One stored entry. Timestamps are unix milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    pub key: String,
    pub key_type: String,
    pub search_term: String,
    pub content: serde_json::Value,
    pub created_at: i64,
    pub ttl_days: u32,
    pub hit_count: u64,
    pub last_accessed: i64,
}

impl CacheRecord {
    pub fn expires_at(&self) -> i64 {
        self.created_at
            .saturating_add(i64::from(self.ttl_days).saturating_mul(DAY_MS))
    }

    /// Live while `now < created_at + ttl`.
    pub fn is_live(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at()
    }
}

/// Aggregate counters over the whole store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: u64,
    pub total_hits: u64,
}

/// Key/value store with conditional TTL semantics.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<CacheRecord>, CacheError>;

    /// Insert or replace an entry.
    fn upsert(&self, record: &CacheRecord) -> Result<(), CacheError>;

    /// Bump hit count and last-accessed, only if the entry is still live at
    /// `now_ms`. Returns whether a row was updated.
    fn record_hit(&self, key: &str, now_ms: i64) -> Result<bool, CacheError>;

    fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Delete the entry only if it has expired at `now_ms`, so a concurrent
    /// fresh `upsert` is never removed.
    fn delete_if_expired(&self, key: &str, now_ms: i64) -> Result<bool, CacheError>;

    /// Delete every expired entry; returns how many were removed.
    fn delete_expired(&self, now_ms: i64) -> Result<usize, CacheError>;

    fn stats(&self) -> Result<CacheStats, CacheError>;
}

// ─── SQLite ──────────────────────────────────────────────────────────────────

/// Expiry predicate shared by the conditional statements (`?1` = now).
const EXPIRED_SQL: &str = "created_at + ttl_days * 86400000 <= ?1";

pub struct SqliteCacheStore {
    conn: Mutex<Connection>,
}

impl SqliteCacheStore {
    /// Open (or create) the cache database at the given path.
    ///
    /// Pass `":memory:"` for an in-memory store (tests).
    pub fn open(path: &str) -> Result<Self, CacheError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open a file-backed store, creating parent directories.
    pub fn open_path(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::Unavailable {
                reason: format!("failed to create {}: {e}", parent.display()),
            })?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, CacheError> {
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                key_type TEXT NOT NULL,
                search_term TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                ttl_days INTEGER NOT NULL,
                hit_count INTEGER NOT NULL DEFAULT 0,
                last_accessed INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_cache_key_type
                ON cache_entries(key_type);
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, CacheError>,
    ) -> Result<T, CacheError> {
        let conn = self.conn.lock().map_err(|_| CacheError::Unavailable {
            reason: "connection mutex poisoned".into(),
        })?;
        f(&conn)
    }
}

impl CacheStore for SqliteCacheStore {
    fn get(&self, key: &str) -> Result<Option<CacheRecord>, CacheError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT key, key_type, search_term, content, created_at, ttl_days,
                            hit_count, last_accessed
                     FROM cache_entries WHERE key = ?1",
                    params![key],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, i64>(4)?,
                            row.get::<_, u32>(5)?,
                            row.get::<_, i64>(6)?,
                            row.get::<_, i64>(7)?,
                        ))
                    },
                )
                .optional()?;

            let Some((key, key_type, search_term, content, created_at, ttl_days, hits, last)) = row
            else {
                return Ok(None);
            };

            Ok(Some(CacheRecord {
                key,
                key_type,
                search_term,
                content: serde_json::from_str(&content)?,
                created_at,
                ttl_days,
                hit_count: u64::try_from(hits).unwrap_or(0),
                last_accessed: last,
            }))
        })
    }

    fn upsert(&self, record: &CacheRecord) -> Result<(), CacheError> {
        let content = serde_json::to_string(&record.content)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO cache_entries
                     (key, key_type, search_term, content, created_at, ttl_days, hit_count, last_accessed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(key) DO UPDATE SET
                     key_type = excluded.key_type,
                     search_term = excluded.search_term,
                     content = excluded.content,
                     created_at = excluded.created_at,
                     ttl_days = excluded.ttl_days,
                     hit_count = excluded.hit_count,
                     last_accessed = excluded.last_accessed",
                params![
                    record.key,
                    record.key_type,
                    record.search_term,
                    content,
                    record.created_at,
                    record.ttl_days,
                    i64::try_from(record.hit_count).unwrap_or(i64::MAX),
                    record.last_accessed,
                ],
            )?;
            Ok(())
        })
    }

    fn record_hit(&self, key: &str, now_ms: i64) -> Result<bool, CacheError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE cache_entries
                 SET hit_count = hit_count + 1, last_accessed = ?1
                 WHERE key = ?2 AND created_at + ttl_days * 86400000 > ?1",
                params![now_ms, key],
            )?;
            Ok(changed > 0)
        })
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
            Ok(changed > 0)
        })
    }

    fn delete_if_expired(&self, key: &str, now_ms: i64) -> Result<bool, CacheError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                &format!("DELETE FROM cache_entries WHERE key = ?2 AND {EXPIRED_SQL}"),
                params![now_ms, key],
            )?;
            Ok(changed > 0)
        })
    }

    fn delete_expired(&self, now_ms: i64) -> Result<usize, CacheError> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                &format!("DELETE FROM cache_entries WHERE {EXPIRED_SQL}"),
                params![now_ms],
            )?;
            Ok(removed)
        })
    }

    fn stats(&self) -> Result<CacheStats, CacheError> {
        self.with_conn(|conn| {
            let (entries, hits): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(hit_count), 0) FROM cache_entries",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(CacheStats {
                entries: u64::try_from(entries).unwrap_or(0),
                total_hits: u64::try_from(hits).unwrap_or(0),
            })
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
