//! Configuration loaded from TOML or JSON files.

use crate::context::ContextKind;
use crate::orchestrator::SyncOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Session defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Context kind used when the caller only supplies a name.
    pub default_context: ContextKind,
    /// Refuse servers that cannot report last successful sync times.
    pub require_last_sync_time: bool,
}

/// Logging setup consumed by [`crate::telemetry::init_tracing`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            json: false,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DsReplConfig {
    /// Session defaults.
    pub session: SessionConfig,
    /// Default orchestrator flags.
    pub sync: SyncOptions,
    /// Logging setup.
    pub logging: LoggingConfig,
}

impl DsReplConfig {
    /// Load from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: DsReplConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: DsReplConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }
}
