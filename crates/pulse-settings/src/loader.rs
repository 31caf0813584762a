//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PulseSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `PULSE_*` environment overrides
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::PulseSettings;

/// Resolve the default settings file path (`~/.pulse/settings.json`).
///
/// `PULSE_SETTINGS` overrides the location.
pub fn settings_path() -> PathBuf {
    if let Some(explicit) = read_env_string("PULSE_SETTINGS") {
        return PathBuf::from(explicit);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".pulse").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PulseSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or values that fail
/// [`PulseSettings::validate`] are errors.
pub fn load_settings_from_path(path: &Path) -> Result<PulseSettings> {
    let defaults = serde_json::to_value(PulseSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: PulseSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Values that fail to parse or fall outside their range are ignored with a
/// warning and the file/default value is kept.
pub fn apply_env_overrides(settings: &mut PulseSettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("PULSE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("PULSE_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_usize("PULSE_MAX_CONNECTIONS", 1, 1_000_000) {
        settings.server.max_connections = v;
    }

    // ── Hub ─────────────────────────────────────────────────────────
    if let Some(v) = read_env_u64("PULSE_PING_INTERVAL_SECS", 1, 3_600) {
        settings.hub.ping_interval_secs = v;
    }
    if let Some(v) = read_env_u64("PULSE_LIVENESS_TIMEOUT_SECS", 2, 7_200) {
        settings.hub.liveness_timeout_secs = v;
    }
    if let Some(v) = read_env_u64("PULSE_ANALYTICS_INTERVAL_SECS", 1, 3_600) {
        settings.hub.analytics_interval_secs = v;
    }
    if let Some(v) = read_env_string("PULSE_ANALYTICS_PERIOD") {
        settings.hub.analytics_period = v;
    }
    if let Some(v) = read_env_u64("PULSE_JOB_POLL_INTERVAL_SECS", 1, 600) {
        settings.hub.job_poll_interval_secs = v;
    }
    if let Some(v) = read_env_usize("PULSE_OUTBOX_CAPACITY", 1, 65_536) {
        settings.hub.outbox_capacity = v;
    }

    // ── Upstream ────────────────────────────────────────────────────
    if let Some(v) = read_env_string("PULSE_UPSTREAM_URL") {
        settings.upstream.base_url = v;
    }
    if let Some(v) = read_env_u64("PULSE_UPSTREAM_TIMEOUT_MS", 100, 600_000) {
        settings.upstream.timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("PULSE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_string("PULSE_LOG_FORMAT") {
        settings.logging.format = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}
