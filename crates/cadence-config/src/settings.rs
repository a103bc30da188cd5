//! Validated settings structures

use crate::schema::{
    RawConfig, RawPlanningConfig, RawServiceConfig, RawSessionConfig, RawStreamConfig,
};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MIN_TIME_BUDGET_MINUTES: u32 = 15;
pub const DEFAULT_MAX_TIME_BUDGET_MINUTES: u32 = 480;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 15;
pub const DEFAULT_MAX_DURATION_SECS: u64 = 1800;
pub const DEFAULT_PLANNING_WORKERS: usize = 2;
pub const DEFAULT_MAX_TASKS: usize = 12;
pub const DEFAULT_MIN_EVIDENCE: usize = 2;
pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 120;

/// Validated settings ready for use by the service
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub service: ServiceSettings,
    pub session: SessionLimits,
    pub stream: StreamSettings,
    pub planning: PlanningSettings,
}

impl Settings {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            service: ServiceSettings::from_raw(raw.service),
            session: SessionLimits::from_raw(raw.session),
            stream: StreamSettings::from_raw(raw.stream),
            planning: PlanningSettings::from_raw(raw.planning),
        }
    }
}

/// Where the service listens and stores its data
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub socket_path: PathBuf,
    pub data_dir: PathBuf,
}

impl ServiceSettings {
    fn from_raw(raw: RawServiceConfig) -> Self {
        Self {
            socket_path: raw
                .socket_path
                .unwrap_or_else(cadence_util::default_socket_path),
            data_dir: raw.data_dir.unwrap_or_else(cadence_util::default_data_dir),
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from_raw(RawServiceConfig::default())
    }
}

/// Accepted range for a session's time budget, inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    pub min_time_budget_minutes: u32,
    pub max_time_budget_minutes: u32,
}

impl SessionLimits {
    fn from_raw(raw: RawSessionConfig) -> Self {
        Self {
            min_time_budget_minutes: raw
                .min_time_budget_minutes
                .unwrap_or(DEFAULT_MIN_TIME_BUDGET_MINUTES),
            max_time_budget_minutes: raw
                .max_time_budget_minutes
                .unwrap_or(DEFAULT_MAX_TIME_BUDGET_MINUTES),
        }
    }

    pub fn contains(&self, minutes: u32) -> bool {
        (self.min_time_budget_minutes..=self.max_time_budget_minutes).contains(&minutes)
    }
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self::from_raw(RawSessionConfig::default())
    }
}

/// Timing of the event delivery gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub max_duration: Duration,
}

impl StreamSettings {
    fn from_raw(raw: RawStreamConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(
                raw.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            heartbeat_interval: Duration::from_secs(
                raw.heartbeat_interval_secs
                    .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            ),
            max_duration: Duration::from_secs(
                raw.max_duration_secs.unwrap_or(DEFAULT_MAX_DURATION_SECS),
            ),
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self::from_raw(RawStreamConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanningSettings {
    pub workers: usize,
    pub max_tasks: usize,
    pub min_evidence: usize,
    pub scan_timeout: Duration,
    pub generation_timeout: Duration,
    pub generator_url: Option<String>,
}

impl PlanningSettings {
    fn from_raw(raw: RawPlanningConfig) -> Self {
        Self {
            workers: raw.workers.unwrap_or(DEFAULT_PLANNING_WORKERS),
            max_tasks: raw.max_tasks.unwrap_or(DEFAULT_MAX_TASKS),
            min_evidence: raw.min_evidence.unwrap_or(DEFAULT_MIN_EVIDENCE),
            scan_timeout: Duration::from_secs(
                raw.scan_timeout_secs.unwrap_or(DEFAULT_SCAN_TIMEOUT_SECS),
            ),
            generation_timeout: Duration::from_secs(
                raw.generation_timeout_secs
                    .unwrap_or(DEFAULT_GENERATION_TIMEOUT_SECS),
            ),
            generator_url: raw.generator_url,
        }
    }
}

impl Default for PlanningSettings {
    fn default() -> Self {
        Self::from_raw(RawPlanningConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_applied() {
        let settings = Settings::from_raw(RawConfig::default());
        assert_eq!(settings.session.min_time_budget_minutes, 15);
        assert_eq!(settings.session.max_time_budget_minutes, 480);
        assert_eq!(settings.stream.poll_interval, Duration::from_millis(500));
        assert_eq!(settings.stream.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(settings.stream.max_duration, Duration::from_secs(1800));
        assert_eq!(settings.planning.workers, 2);
        assert!(settings.planning.generator_url.is_none());
    }

    #[test]
    fn budget_range_is_inclusive() {
        let limits = SessionLimits::default();
        assert!(limits.contains(15));
        assert!(limits.contains(480));
        assert!(!limits.contains(14));
        assert!(!limits.contains(481));
    }
}
