//! The `cache` configuration section.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use super::key::KeyClass;
use super::policy::CacheRule;
use super::result_cache::DEFAULT_MAX_KEY_LEN;

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// SQLite file. Defaults to `<data_dir>/cache.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_max_key_len")]
    pub max_key_len: usize,
    /// Per-class TTL overrides in days.
    #[serde(default)]
    pub ttl_days: HashMap<KeyClass, u32>,
    /// Extra cacheable operations, merged over the built-in policy.
    #[serde(default)]
    pub rules: HashMap<String, CacheRule>,
}

fn default_enabled() -> bool {
    true
}

fn default_max_key_len() -> usize {
    DEFAULT_MAX_KEY_LEN
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            path: None,
            max_key_len: default_max_key_len(),
            ttl_days: HashMap::new(),
            rules: HashMap::new(),
        }
    }
}

impl CacheConfig {
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path
            .clone()
            .or_else(|| crate::data_dir().map(|dir| dir.join("cache.db")))
    }
}
