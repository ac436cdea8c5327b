//! Cache key classes and key normalization.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Smallest length bound honoured by [`normalize_key`].
pub const MIN_KEY_LEN: usize = 32;

/// Hex digits of the content hash appended to truncated keys.
const HASH_SUFFIX_HEX: usize = 16;

/// Kind of cached result. Each class carries its own default TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyClass {
    Guideline,
    DrugSearch,
    DrugDetail,
    Geolocation,
}

impl KeyClass {
    pub const ALL: [KeyClass; 4] = [
        KeyClass::Guideline,
        KeyClass::DrugSearch,
        KeyClass::DrugDetail,
        KeyClass::Geolocation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyClass::Guideline => "guideline",
            KeyClass::DrugSearch => "drug_search",
            KeyClass::DrugDetail => "drug_detail",
            KeyClass::Geolocation => "geolocation",
        }
    }

    /// Built-in time-to-live, in days.
    pub fn default_ttl_days(&self) -> u32 {
        match self {
            KeyClass::Guideline => 30,
            KeyClass::DrugSearch | KeyClass::DrugDetail => 7,
            KeyClass::Geolocation => 1,
        }
    }
}

impl fmt::Display for KeyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize a raw key: lowercase and collapse internal whitespace.
///
/// Values longer than `max_len` chars are truncated and suffixed with `#`
/// and 16 hex digits of the SHA-256 of the full normalized value, so the
/// result is bounded and two long values that share a prefix stay distinct.
pub fn normalize_key(raw: &str, max_len: usize) -> String {
    let max_len = max_len.max(MIN_KEY_LEN);
    let normalized = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    if normalized.chars().count() <= max_len {
        return normalized;
    }

    let digest = Sha256::digest(normalized.as_bytes());
    let suffix: String = digest
        .iter()
        .take(HASH_SUFFIX_HEX / 2)
        .map(|b| format!("{b:02x}"))
        .collect();

    let keep = max_len - HASH_SUFFIX_HEX - 1;
    let prefix: String = normalized.chars().take(keep).collect();
    format!("{prefix}#{suffix}")
}

/// Full store key: `<class>:<normalized raw key>`.
pub fn cache_key(class: KeyClass, raw: &str, max_len: usize) -> String {
    format!("{}:{}", class.as_str(), normalize_key(raw, max_len))
}
