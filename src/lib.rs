pub mod agent_core;
pub mod cache;
pub mod config;
pub mod inference;
pub mod mcp_client;
pub mod region;

use std::path::PathBuf;

pub use agent_core::{AgentError, Consultation, ConsultationReport, StructuredAnswer};
pub use config::MedrouteConfig;

/// Env var switching log output to JSON lines.
pub const LOG_JSON_ENV_VAR: &str = "MEDROUTE_LOG_JSON";

/// Return the platform-standard data directory for Medroute.
///
/// - macOS: `~/Library/Application Support/medroute/`
/// - Windows: `{FOLDERID_RoamingAppData}\medroute\`
/// - Linux: `$XDG_DATA_HOME/medroute/` (fallback `~/.local/share/medroute/`)
///
/// `None` when the platform has no resolvable data directory.
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("medroute"))
}

/// Initialize the tracing subscriber, writing to stderr.
///
/// Filter comes from `RUST_LOG`, defaulting to `medroute=info,warn`. Set
/// `MEDROUTE_LOG_JSON=1` for JSON lines. Safe to call more than once; only
/// the first call installs a subscriber.
pub fn init_tracing() {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("medroute=info,warn"));
    let json = std::env::var(LOG_JSON_ENV_VAR).is_ok_and(|v| v == "1" || v == "true");

    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false);

    let installed = if json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };

    if installed {
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            data_dir = ?data_dir(),
            pid = std::process::id(),
            "=== Medroute starting ==="
        );
    }
}
