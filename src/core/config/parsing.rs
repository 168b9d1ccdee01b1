use std::env;

use super::types::{ConfigError, Environment, StateBackend};
use crate::services::submission_finalize::UnansweredPolicy;

const DEFAULT_CORS_ORIGINS: &[&str] =
    &["http://localhost:5173", "http://localhost:3000", "http://localhost:8080"];

pub(super) fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

pub(super) fn env_or_default(key: &str, default: &str) -> String {
    env_optional(key).unwrap_or_else(|| default.to_string())
}

pub(super) fn parse_u16(field: &'static str, value: String) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_u64(field: &'static str, value: String) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_cors_origins(value: Option<String>) -> Result<Vec<String>, ConfigError> {
    let Some(raw) = value else {
        return Ok(default_cors_origins());
    };

    if raw.trim().is_empty() {
        return Ok(default_cors_origins());
    }

    if raw.trim_start().starts_with('[') {
        let parsed: Vec<String> =
            serde_json::from_str(&raw).map_err(|_| ConfigError::InvalidCors(raw.clone()))?;
        if parsed.is_empty() {
            return Ok(default_cors_origins());
        }
        return Ok(parsed);
    }

    let items: Vec<String> = raw
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect();

    if items.is_empty() {
        return Ok(default_cors_origins());
    }

    Ok(items)
}

pub(super) fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON")
}

pub(super) fn parse_environment(value: Option<String>) -> Environment {
    match value.as_deref().map(|item| item.to_lowercase()) {
        Some(ref val) if val == "production" || val == "prod" => Environment::Production,
        Some(ref val) if val == "staging" => Environment::Staging,
        Some(ref val) if val == "test" || val == "testing" => Environment::Test,
        _ => Environment::Development,
    }
}

pub(super) fn parse_state_backend(value: Option<String>) -> Result<StateBackend, ConfigError> {
    match value.as_deref().map(|item| item.to_ascii_lowercase()) {
        None => Ok(StateBackend::Memory),
        Some(ref val) if val == "memory" => Ok(StateBackend::Memory),
        Some(ref val) if val == "redis" => Ok(StateBackend::Redis),
        Some(val) => Err(ConfigError::InvalidValue { field: "ATTEMPT_STATE_BACKEND", value: val }),
    }
}

pub(super) fn parse_unanswered_policy(
    value: Option<String>,
) -> Result<UnansweredPolicy, ConfigError> {
    match value.as_deref().map(|item| item.to_ascii_lowercase()) {
        None => Ok(UnansweredPolicy::Sentinel),
        Some(ref val) if val == "sentinel" => Ok(UnansweredPolicy::Sentinel),
        Some(ref val) if val == "omit" => Ok(UnansweredPolicy::Omit),
        Some(val) => {
            Err(ConfigError::InvalidValue { field: "PICRETE_UNANSWERED_POLICY", value: val })
        }
    }
}

fn default_cors_origins() -> Vec<String> {
    DEFAULT_CORS_ORIGINS.iter().map(|item| item.to_string()).collect()
}
