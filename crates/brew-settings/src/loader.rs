//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`BrewSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `BREW_*` environment variable overrides
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::BrewSettings;

/// Resolve the path to the settings file (`~/.brew/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".brew").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<BrewSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<BrewSettings> {
    let defaults = serde_json::to_value(BrewSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: BrewSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
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
/// Invalid values are ignored with a warning and the file/default value kept.
pub fn apply_env_overrides(settings: &mut BrewSettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("BREW_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("BREW_PORT", 0, 65535) {
        settings.server.port = v;
    }

    // ── Connection ──────────────────────────────────────────────────
    if let Some(v) = read_env_usize("BREW_MAX_MESSAGE_SIZE", 64, 16 * 1024 * 1024) {
        settings.connection.max_message_size = v;
    }
    if let Some(v) = read_env_u64("BREW_PONG_WAIT_MS", 1_000, 3_600_000) {
        settings.connection.pong_wait_ms = v;
    }
    if let Some(v) = read_env_u64("BREW_PING_PERIOD_MS", 500, 3_600_000) {
        settings.connection.ping_period_ms = v;
    }
    if let Some(v) = read_env_u64("BREW_WRITE_WAIT_MS", 100, 600_000) {
        settings.connection.write_wait_ms = v;
    }
    if let Some(v) = read_env_usize("BREW_MAILBOX_CAPACITY", 1, 65_536) {
        settings.connection.mailbox_capacity = v;
    }

    // ── Kettle ──────────────────────────────────────────────────────
    if let Some(v) = read_env_u64("BREW_OFFER_WINDOW_SECS", 1, 86_400) {
        settings.kettle.offer_window_secs = v;
    }
    if let Some(v) = read_env_u32("BREW_NOTIFY_RADIUS_METRES", 1, 100_000) {
        settings.kettle.notify_radius_metres = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("BREW_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("BREW_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as an integer within an inclusive range.
pub fn parse_in_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_ranged<T>(name: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let val = std::env::var(name).ok()?;
    let result = parse_in_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid numeric env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    read_env_ranged(name, min, max)
}

fn read_env_u32(name: &str, min: u32, max: u32) -> Option<u32> {
    read_env_ranged(name, min, max)
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    read_env_ranged(name, min, max)
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    read_env_ranged(name, min, max)
}
