//! Configuration validation

use crate::schema::RawConfig;
use crate::settings::{
    DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_MAX_DURATION_SECS, DEFAULT_MAX_TIME_BUDGET_MINUTES,
    DEFAULT_MIN_TIME_BUDGET_MINUTES, DEFAULT_POLL_INTERVAL_MS,
};
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("[session] min_time_budget_minutes ({min}) exceeds max_time_budget_minutes ({max})")]
    BudgetRange { min: u32, max: u32 },

    #[error("[stream] {0}")]
    StreamTiming(String),

    #[error("[planning] {field} must be greater than zero")]
    ZeroPlanningValue { field: &'static str },

    #[error("[planning] generator_url '{0}' must be an http or https URL")]
    InvalidGeneratorUrl(String),
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let min = config
        .session
        .min_time_budget_minutes
        .unwrap_or(DEFAULT_MIN_TIME_BUDGET_MINUTES);
    let max = config
        .session
        .max_time_budget_minutes
        .unwrap_or(DEFAULT_MAX_TIME_BUDGET_MINUTES);
    if min > max {
        errors.push(ValidationError::BudgetRange { min, max });
    }

    errors.extend(validate_stream(config));

    let planning = &config.planning;
    for (field, value) in [
        ("workers", planning.workers),
        ("max_tasks", planning.max_tasks),
        ("scan_timeout_secs", planning.scan_timeout_secs.map(|v| v as usize)),
        (
            "generation_timeout_secs",
            planning.generation_timeout_secs.map(|v| v as usize),
        ),
    ] {
        if value == Some(0) {
            errors.push(ValidationError::ZeroPlanningValue { field });
        }
    }

    if let Some(url) = &planning.generator_url
        && !(url.starts_with("http://") || url.starts_with("https://"))
    {
        errors.push(ValidationError::InvalidGeneratorUrl(url.clone()));
    }

    errors
}

fn validate_stream(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let poll_ms = config
        .stream
        .poll_interval_ms
        .unwrap_or(DEFAULT_POLL_INTERVAL_MS);
    let heartbeat_secs = config
        .stream
        .heartbeat_interval_secs
        .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_SECS);
    let max_secs = config
        .stream
        .max_duration_secs
        .unwrap_or(DEFAULT_MAX_DURATION_SECS);

    if poll_ms == 0 {
        errors.push(ValidationError::StreamTiming(
            "poll_interval_ms must be greater than zero".into(),
        ));
    }

    if heartbeat_secs.saturating_mul(1000) <= poll_ms {
        errors.push(ValidationError::StreamTiming(format!(
            "heartbeat_interval_secs ({}s) must be longer than poll_interval_ms ({}ms)",
            heartbeat_secs, poll_ms
        )));
    }

    if max_secs <= heartbeat_secs {
        errors.push(ValidationError::StreamTiming(format!(
            "max_duration_secs ({}) must be longer than heartbeat_interval_secs ({})",
            max_secs, heartbeat_secs
        )));
    }

    errors
}
