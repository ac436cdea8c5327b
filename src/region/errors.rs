//! Region table errors. Raised only while loading configuration; resolving a
//! region identifier never fails.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegionError {
    /// Two regions claim the same alias (after normalization).
    #[error("alias '{alias}' claimed by both '{first}' and '{second}'")]
    DuplicateAlias {
        alias: String,
        first: String,
        second: String,
    },

    /// The configured fallback region is not in the table.
    #[error("fallback region '{code}' is not defined")]
    MissingFallback {
        code: String,
    },

    /// A region lists no servers.
    #[error("region '{code}' has no servers")]
    EmptyRegion {
        code: String,
    },

    /// Building the geolocation HTTP client failed.
    #[error("geolocation client error: {reason}")]
    HttpClient {
        reason: String,
    },
}
