//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::GatelinkSettings;

/// `~/.gatelink` (falls back to `/tmp/.gatelink` without `HOME`).
pub fn gatelink_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".gatelink")
}

/// Default settings file path (`~/.gatelink/settings.json`).
pub fn settings_path() -> PathBuf {
    gatelink_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<GatelinkSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or a non-WebSocket URL is an
/// error.
pub fn load_settings_from_path(path: &Path) -> Result<GatelinkSettings> {
    let defaults = serde_json::to_value(GatelinkSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: GatelinkSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
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

/// Whether `url` uses the `ws://` or `wss://` scheme.
pub fn is_websocket_url(url: &str) -> bool {
    url.starts_with("ws://") || url.starts_with("wss://")
}

fn validate(settings: &GatelinkSettings) -> Result<()> {
    let url = settings.gateway.url.as_str();
    if !is_websocket_url(url) {
        return Err(SettingsError::InvalidValue(format!(
            "gateway.url must use ws:// or wss://, got {url:?}"
        )));
    }
    if settings.gateway.queue_capacity == 0 {
        return Err(SettingsError::InvalidValue(
            "gateway.queueCapacity must be at least 1".into(),
        ));
    }
    if settings.gateway.heartbeat_interval_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "gateway.heartbeatIntervalMs must be at least 1".into(),
        ));
    }
    Ok(())
}

/// Apply `GATELINK_*` environment overrides.
///
/// Invalid values are logged and ignored.
pub fn apply_env_overrides(settings: &mut GatelinkSettings) {
    if let Some(v) = read_env_string("GATELINK_URL") {
        override_url(settings, v);
    }
    if let Some(v) = read_env_string("GATELINK_TOKEN") {
        settings.gateway.token = Some(v);
    }
    if let Some(v) = read_env_bool("GATELINK_RECONNECT") {
        settings.gateway.reconnect = v;
    }
    if let Some(v) = read_env_u64("GATELINK_MAX_RECONNECT_ATTEMPTS", 0, 1_000) {
        #[allow(clippy::cast_possible_truncation)]
        let attempts = v as u32;
        settings.gateway.max_reconnect_attempts = attempts;
    }
    if let Some(v) = read_env_u64("GATELINK_HEARTBEAT_INTERVAL_MS", 1_000, 600_000) {
        settings.gateway.heartbeat_interval_ms = v;
    }
    if let Some(v) = read_env_u64("GATELINK_REQUEST_TIMEOUT_MS", 100, 3_600_000) {
        settings.gateway.request_timeout_ms = v;
    }
    if let Some(v) = read_env_string("GATELINK_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_string("GATELINK_IDENTITY_PATH") {
        settings.identity.path = Some(PathBuf::from(v));
    }
    if let Some(v) = read_env_string("GATELINK_LOCALE") {
        settings.client.locale = Some(v);
    }
}

fn override_url(settings: &mut GatelinkSettings, url: String) {
    if is_websocket_url(&url) {
        settings.gateway.url = url;
    } else {
        warn!(key = "GATELINK_URL", value = %url, "env URL must use ws:// or wss://, ignoring");
    }
}

/// Parse a string as a boolean (`true`/`1`/`yes`/`on`, `false`/`0`/`no`/`off`).
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
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

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid integer env var, ignoring");
    }
    result
}
