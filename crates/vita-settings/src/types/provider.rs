//! Inference provider settings.

use serde::{Deserialize, Serialize};

/// OpenAI-compatible chat completions endpoint plus the retry policy wrapped around it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    /// Base URL; `/chat/completions` is appended.
    pub base_url: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// TCP connect timeout.
    pub connect_timeout_ms: u64,
    /// Maximum silence between SSE chunks before the stream is abandoned.
    pub idle_timeout_ms: u64,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Consecutive failures that open the circuit breaker.
    pub circuit_failure_threshold: u32,
    /// How long the circuit stays open before a probe is allowed.
    pub circuit_cooldown_ms: u64,
    /// Completion token cap. `None` leaves it to the backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            model: "gemini-2.0-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            connect_timeout_ms: 10_000,
            idle_timeout_ms: 60_000,
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            circuit_failure_threshold: 5,
            circuit_cooldown_ms: 30_000,
            max_tokens: None,
            temperature: None,
        }
    }
}
