//! Region composer: region identifier → ordered capability server specs.
//!
//! Resolution is total. Unrecognized identifiers resolve to the fallback
//! region rather than failing, so capability selection degrades instead of
//! blocking a request.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use super::errors::RegionError;
use super::types::{DrugLookup, RegionDef, RegionTable};
use crate::mcp_client::ServerSpec;

/// The outcome of composing one region.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedRegion {
    pub code: String,
    pub servers: Vec<ServerSpec>,
    pub drug_lookup: Option<DrugLookup>,
    /// Whether the identifier was unrecognized and the fallback was used.
    pub is_fallback: bool,
}

impl ResolvedRegion {
    pub fn server_names(&self) -> Vec<&str> {
        self.servers.iter().map(|s| s.name.as_str()).collect()
    }
}

pub struct RegionComposer {
    table: RegionTable,
    /// Normalized code or alias → index into `table.regions`.
    index: HashMap<String, usize>,
    fallback: usize,
}

impl RegionComposer {
    /// Build a composer, validating the table.
    pub fn new(table: RegionTable) -> Result<Self, RegionError> {
        if let Some(region) = table.regions.iter().find(|r| r.servers.is_empty()) {
            return Err(RegionError::EmptyRegion {
                code: region.code.clone(),
            });
        }

        let mut index: HashMap<String, usize> = HashMap::new();
        for (i, region) in table.regions.iter().enumerate() {
            for key in std::iter::once(&region.code).chain(region.aliases.iter()) {
                let key = normalize(key);
                match index.get(&key).copied() {
                    Some(owner) if owner != i => {
                        return Err(RegionError::DuplicateAlias {
                            alias: key,
                            first: table.regions[owner].code.clone(),
                            second: region.code.clone(),
                        });
                    }
                    _ => {
                        index.insert(key, i);
                    }
                }
            }
        }

        let fallback = index
            .get(&normalize(&table.fallback))
            .copied()
            .ok_or_else(|| RegionError::MissingFallback {
                code: table.fallback.clone(),
            })?;

        Ok(Self {
            table,
            index,
            fallback,
        })
    }

    /// Composer over the built-in table.
    pub fn builtin() -> Self {
        let table = RegionTable::default();
        let mut index = HashMap::new();
        for (i, region) in table.regions.iter().enumerate() {
            for key in std::iter::once(&region.code).chain(region.aliases.iter()) {
                index.entry(normalize(key)).or_insert(i);
            }
        }
        let fallback = index.get(&normalize(&table.fallback)).copied().unwrap_or(0);
        Self {
            table,
            index,
            fallback,
        }
    }

    pub fn table(&self) -> &RegionTable {
        &self.table
    }

    /// The recognized region for an identifier, if any.
    pub fn lookup(&self, identifier: &str) -> Option<&RegionDef> {
        self.index
            .get(&normalize(identifier))
            .map(|&i| &self.table.regions[i])
    }

    /// Whether an identifier names a known region (no composition).
    pub fn is_supported(&self, identifier: &str) -> bool {
        self.index.contains_key(&normalize(identifier))
    }

    /// The alias table: every accepted normalized identifier → region code.
    pub fn supported_regions(&self) -> BTreeMap<String, String> {
        self.index
            .iter()
            .map(|(alias, &i)| (alias.clone(), self.table.regions[i].code.clone()))
            .collect()
    }

    /// The region for an identifier, falling back when unrecognized.
    pub fn region_for(&self, identifier: &str) -> &RegionDef {
        self.lookup(identifier)
            .unwrap_or(&self.table.regions[self.fallback])
    }

    /// Compose the full server set for an identifier.
    pub fn compose(&self, identifier: &str) -> ResolvedRegion {
        let (region, is_fallback) = match self.lookup(identifier) {
            Some(region) => (region, false),
            None => {
                tracing::info!(
                    identifier,
                    fallback = %self.table.fallback,
                    "unrecognized region, using fallback"
                );
                (&self.table.regions[self.fallback], true)
            }
        };

        let mut names: Vec<&str> = Vec::new();
        for name in region.servers.iter().chain(self.table.shared_servers.iter()) {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }

        let servers: Vec<ServerSpec> = names
            .into_iter()
            .map(|name| ServerSpec::new(name, self.table.launch_for(name)))
            .collect();

        tracing::debug!(
            identifier,
            region = %region.code,
            servers = servers.len(),
            "region composed"
        );

        ResolvedRegion {
            code: region.code.clone(),
            servers,
            drug_lookup: region.drug_lookup.clone(),
            is_fallback,
        }
    }

    /// Ordered server specs for an identifier. Never empty.
    pub fn resolve(&self, identifier: &str) -> Vec<ServerSpec> {
        self.compose(identifier).servers
    }
}

impl Default for RegionComposer {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Normalize a region identifier: trim, drop dots, treat `_`/`-` as spaces,
/// collapse whitespace and uppercase.
pub fn normalize(identifier: &str) -> String {
    identifier
        .replace('.', "")
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
