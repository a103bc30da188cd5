//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Socket and storage locations
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Limits applied when a session is started
    #[serde(default)]
    pub session: RawSessionConfig,

    /// Event delivery timing
    #[serde(default)]
    pub stream: RawStreamConfig,

    /// Planning workers and collaborators
    #[serde(default)]
    pub planning: RawPlanningConfig,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            config_version: crate::CURRENT_CONFIG_VERSION,
            service: RawServiceConfig::default(),
            session: RawSessionConfig::default(),
            stream: RawStreamConfig::default(),
            planning: RawPlanningConfig::default(),
        }
    }
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// IPC socket path (default: $XDG_RUNTIME_DIR/cadence/cadenced.sock)
    pub socket_path: Option<PathBuf>,

    /// Data directory for the session store
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawSessionConfig {
    pub min_time_budget_minutes: Option<u32>,
    pub max_time_budget_minutes: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawStreamConfig {
    /// How often the event log is read, in milliseconds
    pub poll_interval_ms: Option<u64>,

    /// Quiet period after which a heartbeat frame is sent
    pub heartbeat_interval_secs: Option<u64>,

    /// Hard cap on a single stream's lifetime
    pub max_duration_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawPlanningConfig {
    /// Number of concurrent planning workflows
    pub workers: Option<usize>,

    /// Largest batch of proposals accepted from the generator
    pub max_tasks: Option<usize>,

    /// Evidence citations each proposal must carry
    pub min_evidence: Option<usize>,

    pub scan_timeout_secs: Option<u64>,
    pub generation_timeout_secs: Option<u64>,

    /// HTTP endpoint of an external task generator. When absent the
    /// built-in template generator is used.
    pub generator_url: Option<String>,
}
