//! # Configuration Module
//!
//! Settings for the command line runner, loaded from environment variables
//! (and a `.env` file when present) and overridden by flags.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use agentgraph::{EngineConfig, StoreConfig};

// =============================================================================
// STORE SELECTION
// =============================================================================
/// Where session snapshots live.
///
/// Written as `memory`, `file:<dir>` or `sqlite:<path>`.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreSpec {
    Memory,
    File(PathBuf),
    Sqlite(String),
}

impl StoreSpec {
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.eq_ignore_ascii_case("memory") {
            return Ok(StoreSpec::Memory);
        }
        match text.split_once(':') {
            Some(("file", dir)) if !dir.is_empty() => Ok(StoreSpec::File(PathBuf::from(dir))),
            Some(("sqlite", path)) if !path.is_empty() => Ok(StoreSpec::Sqlite(path.to_string())),
            _ => anyhow::bail!(
                "Invalid store '{}': expected memory, file:<dir> or sqlite:<path>",
                text
            ),
        }
    }

    /// Only file and sqlite stores outlive the process
    pub fn is_durable(&self) -> bool {
        !matches!(self, StoreSpec::Memory)
    }
}

// =============================================================================
// CONFIGURATION STRUCT
// =============================================================================
#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreSpec,

    /// zstd-compress file snapshots
    pub compress: bool,

    /// Per-component invocation limit within one session
    pub circular_limit: u32,

    /// Upper bound on ticks for one run
    pub max_ticks: u64,

    pub component_timeout: Duration,

    /// Keep closed sessions in the store for later inspection
    pub retain_sessions: bool,

    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            store: StoreSpec::Memory,
            compress: false,
            circular_limit: engine.circular_limit,
            max_ticks: engine.max_ticks,
            component_timeout: engine.component_timeout,
            retain_sessions: false,
            log_level: "info".to_string(),
        }
    }
}

// =============================================================================
// CONFIGURATION LOADING
// =============================================================================
fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => anyhow::bail!("{} must be a boolean, got: {}", name, other),
    }
}

impl Config {
    /// Load configuration from `AGENTGRAPH_*` environment variables.
    pub fn from_env() -> Result<Self> {
        // A missing .env file is fine
        let _ = dotenvy::dotenv();

        let mut config = Config::default();

        if let Ok(val) = env::var("AGENTGRAPH_STORE") {
            config.store = StoreSpec::parse(&val).context("AGENTGRAPH_STORE")?;
        }

        if let Ok(val) = env::var("AGENTGRAPH_COMPRESS") {
            config.compress = parse_bool("AGENTGRAPH_COMPRESS", &val)?;
        }

        if let Ok(val) = env::var("AGENTGRAPH_CIRCULAR_LIMIT") {
            config.circular_limit = val
                .parse()
                .context("AGENTGRAPH_CIRCULAR_LIMIT must be a positive integer")?;
        }

        if let Ok(val) = env::var("AGENTGRAPH_MAX_TICKS") {
            config.max_ticks = val
                .parse()
                .context("AGENTGRAPH_MAX_TICKS must be a positive integer")?;
        }

        if let Ok(val) = env::var("AGENTGRAPH_COMPONENT_TIMEOUT_SECS") {
            let secs: u64 = val
                .parse()
                .context("AGENTGRAPH_COMPONENT_TIMEOUT_SECS must be a whole number of seconds")?;
            config.component_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = env::var("AGENTGRAPH_RETAIN_SESSIONS") {
            config.retain_sessions = parse_bool("AGENTGRAPH_RETAIN_SESSIONS", &val)?;
        }

        if let Ok(val) = env::var("RUST_LOG") {
            config.log_level = val;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.circular_limit == 0 {
            anyhow::bail!("AGENTGRAPH_CIRCULAR_LIMIT must be at least 1");
        }
        if self.max_ticks == 0 {
            anyhow::bail!("AGENTGRAPH_MAX_TICKS must be at least 1");
        }
        if self.component_timeout.is_zero() {
            anyhow::bail!("AGENTGRAPH_COMPONENT_TIMEOUT_SECS must be at least 1");
        }
        if self.compress && !matches!(self.store, StoreSpec::File(_)) {
            anyhow::bail!("Compression only applies to file stores");
        }
        #[cfg(not(feature = "store-sqlite"))]
        if matches!(self.store, StoreSpec::Sqlite(_)) {
            anyhow::bail!("SQLite store requires the store-sqlite feature");
        }
        Ok(())
    }

    pub fn engine_config(&self, debug: bool) -> EngineConfig {
        EngineConfig::default()
            .with_circular_limit(self.circular_limit)
            .with_max_ticks(self.max_ticks)
            .with_component_timeout(self.component_timeout)
            .with_debug(debug)
            .with_retain_closed_sessions(self.retain_sessions)
    }

    pub fn store_config(&self) -> Result<StoreConfig> {
        match &self.store {
            StoreSpec::Memory => Ok(StoreConfig::Memory),
            StoreSpec::File(path) => Ok(StoreConfig::File {
                path: path.clone(),
                compression: self.compress,
            }),
            #[cfg(feature = "store-sqlite")]
            StoreSpec::Sqlite(path) => Ok(StoreConfig::Sqlite { path: path.clone() }),
            #[cfg(not(feature = "store-sqlite"))]
            StoreSpec::Sqlite(_) => anyhow::bail!("SQLite store requires the store-sqlite feature"),
        }
    }
}
