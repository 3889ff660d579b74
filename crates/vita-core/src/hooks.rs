use serde::{Deserialize, Serialize};

use crate::guardrails::GuardrailRejection;
use crate::session::SessionContext;
use crate::tokens::TokenUsage;

/// Lifecycle points observed during a turn.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HookType {
    AgentStart,
    AgentEnd,
    ToolStart,
    ToolEnd,
    Handoff,
    Error,
    GuardrailViolation,
}

impl HookType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentStart => "AGENT_START",
            Self::AgentEnd => "AGENT_END",
            Self::ToolStart => "TOOL_START",
            Self::ToolEnd => "TOOL_END",
            Self::Handoff => "HANDOFF",
            Self::Error => "ERROR",
            Self::GuardrailViolation => "GUARDRAIL_VIOLATION",
        }
    }
}

/// Read-only view handed to observers.
#[derive(Clone, Copy, Debug)]
pub struct HookContext<'a> {
    pub session: &'a SessionContext,
    /// Tokens consumed so far in the current turn.
    pub turn_usage: TokenUsage,
}

/// Observer of the run lifecycle. Every method defaults to a no-op.
///
/// Callbacks must not fail the turn; the engine isolates panics and reports
/// them through [`RunHooks::on_error`].
pub trait RunHooks: Send + Sync {
    fn on_agent_start(&self, _ctx: &HookContext<'_>, _agent: &str) {}

    /// `agent_usage` is what this agent consumed since its matching start.
    fn on_agent_end(&self, _ctx: &HookContext<'_>, _agent: &str, _output: &str, _agent_usage: TokenUsage) {}

    fn on_tool_start(&self, _ctx: &HookContext<'_>, _agent: &str, _tool: &str) {}

    fn on_tool_end(&self, _ctx: &HookContext<'_>, _agent: &str, _tool: &str, _result: &str, _is_error: bool) {}

    fn on_handoff(&self, _ctx: &HookContext<'_>, _from: &str, _to: &str) {}

    fn on_guardrail_violation(&self, _ctx: &HookContext<'_>, _rejection: &GuardrailRejection) {}

    fn on_error(&self, _ctx: &HookContext<'_>, _method: &str, _error: &str) {}
}
