//! Turn execution settings.

use serde::{Deserialize, Serialize};

/// How a list of guardrails is evaluated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardrailMode {
    /// One check at a time, stopping at the first rejection.
    #[default]
    Sequential,
    /// All checks at once; the first rejection in declared order wins.
    Concurrent,
}

/// Which agent a new turn starts with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartingAgent {
    /// Always the registry's entry agent.
    #[default]
    Entry,
    /// The agent that finished the previous turn.
    LastActive,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeSettings {
    /// Tool-call rounds allowed in a single turn.
    pub max_tool_rounds: u32,
    /// Per-call tool timeout.
    pub tool_timeout_ms: u64,
    /// Tool output beyond this many bytes is truncated before it reaches the model.
    pub max_tool_output_bytes: usize,
    /// Capacity of the fragment channel between a turn and its stream consumer.
    pub stream_buffer: usize,
    pub guardrail_mode: GuardrailMode,
    /// Attempts per guardrail check before it becomes a fatal error.
    pub guardrail_attempts: u32,
    pub starting_agent: StartingAgent,
    /// Consecutive panics after which an observer is skipped.
    pub hook_failure_threshold: u32,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_tool_rounds: 10,
            tool_timeout_ms: 60_000,
            max_tool_output_bytes: 32 * 1024,
            stream_buffer: 64,
            guardrail_mode: GuardrailMode::Sequential,
            guardrail_attempts: 2,
            starting_agent: StartingAgent::Entry,
            hook_failure_threshold: 3,
        }
    }
}
