//! Region table: tagged configuration data mapping region codes to the
//! capability servers they need.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::mcp_client::LaunchSpec;

// ─── Drug Lookup ─────────────────────────────────────────────────────────────

/// The two operations the enrichment pass uses for one region's drug source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrugLookup {
    /// Search-by-name operation.
    pub search_operation: String,
    /// Fetch-detail-by-identifier operation.
    pub detail_operation: String,
    #[serde(default = "default_name_field")]
    pub name_field: String,
    #[serde(default = "default_id_field")]
    pub id_field: String,
}

fn default_name_field() -> String {
    "name".into()
}

fn default_id_field() -> String {
    "drug_id".into()
}

impl DrugLookup {
    /// Lookup for a source following the `search_<src>_drugs` /
    /// `get_<src>_drug` naming.
    pub fn for_source(source: &str) -> Self {
        Self {
            search_operation: format!("search_{source}_drugs"),
            detail_operation: format!("get_{source}_drug"),
            name_field: default_name_field(),
            id_field: default_id_field(),
        }
    }
}

// ─── Regions ─────────────────────────────────────────────────────────────────

/// One region: code, aliases and the ordered servers it requires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionDef {
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub servers: Vec<String>,
    #[serde(default)]
    pub drug_lookup: Option<DrugLookup>,
}

impl RegionDef {
    fn new(code: &str, name: &str, aliases: &[&str], servers: &[&str], drugs: &str) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
            servers: servers.iter().map(|s| s.to_string()).collect(),
            drug_lookup: Some(DrugLookup::for_source(drugs)),
        }
    }
}

/// How servers without an explicit launch spec are started:
/// `<command> -m <module_prefix><name>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultLaunch {
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default = "default_module_prefix")]
    pub module_prefix: String,
    /// Working directory for default-launched servers.
    #[serde(default)]
    pub cwd: Option<String>,
}

fn default_command() -> String {
    "python3".into()
}

fn default_module_prefix() -> String {
    "capability_servers.".into()
}

impl Default for DefaultLaunch {
    fn default() -> Self {
        Self {
            command: default_command(),
            module_prefix: default_module_prefix(),
            cwd: None,
        }
    }
}

/// The complete region configuration. Every field defaults to the built-in
/// table, so a YAML override only needs the parts it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionTable {
    #[serde(default = "builtin_regions")]
    pub regions: Vec<RegionDef>,
    #[serde(default = "default_fallback")]
    pub fallback: String,
    /// Servers appended to every region.
    #[serde(default = "default_shared_servers")]
    pub shared_servers: Vec<String>,
    /// Explicit launch specs by server name.
    #[serde(default)]
    pub servers: HashMap<String, LaunchSpec>,
    #[serde(default)]
    pub default_launch: DefaultLaunch,
}

impl Default for RegionTable {
    fn default() -> Self {
        Self {
            regions: builtin_regions(),
            fallback: default_fallback(),
            shared_servers: default_shared_servers(),
            servers: HashMap::new(),
            default_launch: DefaultLaunch::default(),
        }
    }
}

impl RegionTable {
    /// Launch spec for a server: the explicit entry, or the default module
    /// launch.
    pub fn launch_for(&self, server: &str) -> LaunchSpec {
        if let Some(spec) = self.servers.get(server) {
            return spec.clone();
        }
        LaunchSpec {
            command: self.default_launch.command.clone(),
            args: vec![
                "-m".to_string(),
                format!("{}{server}", self.default_launch.module_prefix),
            ],
            env: HashMap::new(),
            cwd: self.default_launch.cwd.clone(),
        }
    }
}

fn default_fallback() -> String {
    "INTL".into()
}

fn default_shared_servers() -> Vec<String> {
    vec!["patient_context".into()]
}

fn builtin_regions() -> Vec<RegionDef> {
    vec![
        RegionDef::new(
            "GB",
            "United Kingdom",
            &[
                "UK",
                "UNITED KINGDOM",
                "GREAT BRITAIN",
                "BRITAIN",
                "ENGLAND",
                "SCOTLAND",
                "WALES",
                "NORTHERN IRELAND",
            ],
            &["nice_guidelines", "bnf_drugs"],
            "bnf",
        ),
        RegionDef::new(
            "US",
            "United States",
            &["USA", "UNITED STATES", "UNITED STATES OF AMERICA", "AMERICA"],
            &["us_guidelines", "dailymed_drugs"],
            "dailymed",
        ),
        RegionDef::new(
            "IN",
            "India",
            &["INDIA", "BHARAT"],
            &["india_guidelines", "who_guidelines", "openfda_drugs"],
            "openfda",
        ),
        RegionDef::new(
            "CA",
            "Canada",
            &["CANADA"],
            &["canada_guidelines", "openfda_drugs"],
            "openfda",
        ),
        RegionDef::new(
            "AU",
            "Australia",
            &["AUSTRALIA"],
            &["australia_guidelines", "openfda_drugs"],
            "openfda",
        ),
        RegionDef::new(
            "INTL",
            "International",
            &["INTERNATIONAL", "WORLD", "GLOBAL"],
            &["who_guidelines", "openfda_drugs"],
            "openfda",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_launch_spec() {
        let table = RegionTable::default();
        let spec = table.launch_for("bnf_drugs");
        assert_eq!(spec.command, "python3");
        assert_eq!(spec.args, vec!["-m", "capability_servers.bnf_drugs"]);
    }

    #[test]
    fn test_explicit_launch_spec_wins() {
        let yaml = r#"
servers:
  bnf_drugs:
    command: /opt/bnf/server
    args: ["--stdio"]
"#;
        let table: RegionTable = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(table.launch_for("bnf_drugs").command, "/opt/bnf/server");
        assert_eq!(table.launch_for("nice_guidelines").command, "python3");
        // Partial override keeps the built-in regions.
        assert_eq!(table.regions.len(), 6);
    }

    #[test]
    fn test_drug_lookup_for_source() {
        let lookup = DrugLookup::for_source("bnf");
        assert_eq!(lookup.search_operation, "search_bnf_drugs");
        assert_eq!(lookup.detail_operation, "get_bnf_drug");
        assert_eq!(lookup.id_field, "drug_id");
    }
}
