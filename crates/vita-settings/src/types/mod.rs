//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`,
//! so a partial `settings.json` only needs the keys it changes.

mod provider;
mod runtime;

pub use provider::*;
pub use runtime::*;

use serde::{Deserialize, Serialize};

/// Root settings type for the vita runtime.
///
/// ```json
/// {
///   "provider": { "model": "gemini-2.0-flash" },
///   "runtime": { "maxToolRounds": 6, "startingAgent": "last_active" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VitaSettings {
    /// Inference endpoint and retry policy.
    pub provider: ProviderSettings,
    /// Turn execution limits and policies.
    pub runtime: RuntimeSettings,
    /// Logging and summary archive.
    pub telemetry: TelemetrySettings,
    /// Wellness tool defaults.
    pub wellness: WellnessSettings,
}

/// Logging and summary-archive settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetrySettings {
    /// Default log level (`trace`..`error`). `RUST_LOG` still wins.
    pub level: String,
    /// Emit JSON log lines.
    pub json: bool,
    /// Archive closed-session summaries to SQLite.
    pub archive_enabled: bool,
    /// Override for the archive location. Defaults to `~/.vita/database/summaries.db`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_path: Option<String>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            archive_enabled: true,
            archive_path: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WellnessSettings {
    /// Directory where check-in calendar files are written.
    pub calendar_dir: String,
    /// Daily calorie target when the user has not set one.
    pub default_calories: u32,
}

impl Default for WellnessSettings {
    fn default() -> Self {
        Self {
            calendar_dir: ".".to_string(),
            default_calories: 2000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_camel_case() {
        let value = serde_json::to_value(VitaSettings::default()).unwrap();
        assert_eq!(value["runtime"]["maxToolRounds"], 10);
        assert_eq!(value["provider"]["apiKeyEnv"], "GEMINI_API_KEY");
        assert_eq!(value["wellness"]["defaultCalories"], 2000);
        assert!(value["telemetry"].get("archivePath").is_none());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: VitaSettings =
            serde_json::from_value(json!({"runtime": {"guardrailMode": "concurrent"}})).unwrap();
        assert_eq!(settings.runtime.guardrail_mode, GuardrailMode::Concurrent);
        assert_eq!(settings.runtime.max_tool_rounds, 10);
        assert_eq!(settings.provider.model, "gemini-2.0-flash");
    }
}
