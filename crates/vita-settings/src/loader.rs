//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`VitaSettings::default()`]
//! 2. If `~/.vita/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `VITA_*` environment variable overrides (highest priority)
//! 4. Reject values the runtime cannot work with
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::VitaSettings;

/// Resolve the path to the settings file (`~/.vita/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".vita").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<VitaSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an unusable value is an error.
pub fn load_settings_from_path(path: &Path) -> Result<VitaSettings> {
    load_with(path, |name| std::env::var(name).ok())
}

fn load_with(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<VitaSettings> {
    let defaults = serde_json::to_value(VitaSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: VitaSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, env);
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

/// Apply `VITA_*` environment variable overrides to loaded settings.
///
/// Integers must parse and fall within range, booleans accept
/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`. Anything else is
/// ignored with a warning.
pub fn apply_env_overrides(settings: &mut VitaSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

fn apply_overrides(settings: &mut VitaSettings, env: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup: env };

    // ── Provider ────────────────────────────────────────────────────
    if let Some(v) = env.string("VITA_BASE_URL") {
        settings.provider.base_url = v;
    }
    if let Some(v) = env.string("VITA_MODEL") {
        settings.provider.model = v;
    }
    if let Some(v) = env.string("VITA_API_KEY_ENV") {
        settings.provider.api_key_env = v;
    }
    if let Some(v) = env.u64("VITA_MAX_RETRIES", 0, 10) {
        settings.provider.max_retries = v as u32;
    }
    if let Some(v) = env.u64("VITA_IDLE_TIMEOUT_MS", 1_000, 600_000) {
        settings.provider.idle_timeout_ms = v;
    }

    // ── Runtime ─────────────────────────────────────────────────────
    if let Some(v) = env.u64("VITA_MAX_TOOL_ROUNDS", 1, 100) {
        settings.runtime.max_tool_rounds = v as u32;
    }
    if let Some(v) = env.u64("VITA_TOOL_TIMEOUT_MS", 100, 3_600_000) {
        settings.runtime.tool_timeout_ms = v;
    }
    if let Some(v) = env.usize("VITA_STREAM_BUFFER", 1, 65_536) {
        settings.runtime.stream_buffer = v;
    }
    if let Some(v) = env.enumeration("VITA_GUARDRAIL_MODE") {
        settings.runtime.guardrail_mode = v;
    }
    if let Some(v) = env.enumeration("VITA_STARTING_AGENT") {
        settings.runtime.starting_agent = v;
    }

    // ── Telemetry ───────────────────────────────────────────────────
    if let Some(v) = env.string("VITA_LOG_LEVEL") {
        settings.telemetry.level = v;
    }
    if let Some(v) = env.bool("VITA_LOG_JSON") {
        settings.telemetry.json = v;
    }
    if let Some(v) = env.bool("VITA_ARCHIVE_ENABLED") {
        settings.telemetry.archive_enabled = v;
    }
    if let Some(v) = env.string("VITA_ARCHIVE_PATH") {
        settings.telemetry.archive_path = Some(v);
    }

    // ── Wellness ────────────────────────────────────────────────────
    if let Some(v) = env.string("VITA_CALENDAR_DIR") {
        settings.wellness.calendar_dir = v;
    }
    if let Some(v) = env.u64("VITA_DEFAULT_CALORIES", 800, 6_000) {
        settings.wellness.default_calories = v as u32;
    }
}

fn validate(settings: &VitaSettings) -> Result<()> {
    let runtime = &settings.runtime;
    let checks = [
        (runtime.max_tool_rounds == 0, "runtime.maxToolRounds", "must be at least 1"),
        (runtime.guardrail_attempts == 0, "runtime.guardrailAttempts", "must be at least 1"),
        (runtime.stream_buffer == 0, "runtime.streamBuffer", "must be at least 1"),
        (
            settings.provider.base_delay_ms > settings.provider.max_delay_ms,
            "provider.baseDelayMs",
            "must not exceed provider.maxDelayMs",
        ),
    ];
    match checks.into_iter().find(|(broken, _, _)| *broken) {
        Some((_, key, reason)) => Err(SettingsError::Invalid { key, reason }),
        None => Ok(()),
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

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
    }

    fn string(&self, name: &str) -> Option<String> {
        self.raw(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.raw(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.raw(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = self.raw(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }

    /// Lowercased value decoded through the type's serde representation.
    fn enumeration<T: serde::de::DeserializeOwned>(&self, name: &str) -> Option<T> {
        let val = self.string(name)?;
        let result = serde_json::from_value(Value::String(val.to_lowercase())).ok();
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "unrecognised env var value, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
