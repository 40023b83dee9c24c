//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`LumenSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `LUMEN_*` environment overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::LumenSettings;

/// Resolve the path to the settings file (`~/.lumen/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".lumen").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<LumenSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an empty endpoint is an
/// error.
pub fn load_settings_from_path(path: &Path) -> Result<LumenSettings> {
    let mut settings = load_file(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

fn load_file(path: &Path) -> Result<LumenSettings> {
    let defaults = serde_json::to_value(LumenSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

fn validate(settings: &LumenSettings) -> Result<()> {
    if settings.client.endpoint.trim().is_empty() {
        return Err(SettingsError::InvalidValue(
            "client.endpoint is empty".to_string(),
        ));
    }
    if settings.retry.base_delay_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "retry.baseDelayMs must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `LUMEN_*` environment overrides to loaded settings.
///
/// Invalid values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut LumenSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Override logic behind [`apply_env_overrides`], with the variable lookup
/// injected so it can be exercised without touching the process env.
pub fn apply_overrides(settings: &mut LumenSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Client ──────────────────────────────────────────────────────
    if let Some(v) = env.string("LUMEN_ENDPOINT") {
        settings.client.endpoint = v;
    }
    if let Some(v) = env.u64("LUMEN_CONNECT_TIMEOUT_MS", 1, 600_000) {
        settings.client.connect_timeout_ms = v;
    }
    if let Some(v) = env.u64("LUMEN_IDLE_TIMEOUT_MS", 0, 3_600_000) {
        // 0 disables the idle timeout
        settings.client.idle_timeout_ms = (v > 0).then_some(v);
    }

    // ── Retry ───────────────────────────────────────────────────────
    if let Some(v) = env.u64("LUMEN_MAX_RETRIES", 0, 10) {
        settings.retry.max_retries = v as u32;
    }
    if let Some(v) = env.u64("LUMEN_BASE_DELAY_MS", 1, 60_000) {
        settings.retry.base_delay_ms = v;
    }
    if let Some(v) = env.u64("LUMEN_MAX_DELAY_MS", 1, 600_000) {
        settings.retry.max_delay_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("LUMEN_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("LUMEN_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, min, max, "invalid integer env var, ignoring");
        }
        result
    }
}
