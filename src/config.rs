//! Top-level configuration: `medroute.yaml`.
//!
//! Every section is optional and falls back to built-in defaults. String
//! values may reference environment variables as `${VAR}` or
//! `${VAR:-default}`.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::agent_core::{AgentError, AgentSettings};
use crate::cache::CacheConfig;
use crate::inference::ReasoningConfig;
use crate::region::RegionTable;

/// Env var naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "MEDROUTE_CONFIG";

/// File name searched for upward from the working directory.
pub const CONFIG_FILE_NAME: &str = "medroute.yaml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MedrouteConfig {
    pub reasoning: ReasoningConfig,
    pub agent: AgentSettings,
    pub cache: CacheConfig,
    pub regions: RegionTable,
}

impl MedrouteConfig {
    /// Load the discovered config file, or defaults when there is none.
    pub fn discover() -> Result<Self, AgentError> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        match find_config_path(&cwd) {
            Some(path) => {
                tracing::info!(path = %path.display(), "loading config");
                load_config(&path)
            }
            None => {
                tracing::info!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }
}

/// `$MEDROUTE_CONFIG` if it names an existing file, else the nearest
/// `medroute.yaml` at or above `start`.
pub fn find_config_path(start: &Path) -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&explicit));
        if candidate.is_file() {
            return Some(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_ENV_VAR} does not name a file");
    }

    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|candidate| candidate.is_file())
}

pub fn load_config(path: &Path) -> Result<MedrouteConfig, AgentError> {
    let raw = std::fs::read_to_string(path).map_err(|e| AgentError::Config {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;
    parse_config(&raw)
}

/// Parse YAML text after env interpolation. Blank input gives defaults.
pub fn parse_config(raw: &str) -> Result<MedrouteConfig, AgentError> {
    let interpolated = interpolate_env_vars(raw);
    if interpolated.trim().is_empty() {
        return Ok(MedrouteConfig::default());
    }

    let mut config: MedrouteConfig = serde_yaml::from_str(&interpolated)?;
    if let Some(path) = &config.cache.path {
        config.cache.path = Some(PathBuf::from(expand_tilde(&path.to_string_lossy())));
    }
    Ok(config)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&resolve_var_expr(&after[..end]));
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated: keep the text as written.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name).unwrap_or_else(|_| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}
