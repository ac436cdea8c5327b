//! Result cache: a TTL key/value cache in front of expensive capability calls.
//!
//! Keys are `<class>:<normalized argument>`; entries expire lazily on read
//! and via an explicit sweep. The cache is advisory and never raises.

pub mod config;
pub mod errors;
pub mod key;
pub mod policy;
pub mod result_cache;
pub mod store;

pub use config::CacheConfig;
pub use errors::CacheError;
pub use key::{cache_key, normalize_key, KeyClass};
pub use policy::{CachePolicy, CacheRule};
pub use result_cache::{Clock, ResultCache, SystemClock};
pub use store::{CacheRecord, CacheStats, CacheStore, SqliteCacheStore};
