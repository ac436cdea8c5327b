//! Region composer: selects which capability servers a request needs.
//!
//! Regions are tagged configuration data (code, aliases, servers) consumed by
//! one generic composer. A shared patient-context server is appended to every
//! region.

pub mod composer;
pub mod errors;
pub mod geo;
pub mod types;

pub use composer::{normalize, RegionComposer, ResolvedRegion};
pub use errors::RegionError;
pub use geo::{resolve_by_ip, CachedLocator, IpApiLocator, RegionLocator};
pub use types::{DefaultLaunch, DrugLookup, RegionDef, RegionTable};
