//! Agent-to-agent transfer.
//!
//! Every declared handoff target is offered to the model as a
//! `transfer_to_<agent>` tool. Calling it moves the conversation to that
//! agent; the history carries over unchanged.

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use vita_core::hooks::HookContext;
use vita_core::session::SessionContext;
use vita_core::tokens::TokenUsage;
use vita_core::tools::ToolDefinition;

use crate::agents::{AgentDefinition, AgentRegistry};
use crate::error::EngineError;
use crate::hooks::HookDispatcher;

pub const TRANSFER_PREFIX: &str = "transfer_to_";

/// `"Health Wellness Planner Agent"` → `"transfer_to_health_wellness_planner_agent"`.
pub fn transfer_tool_name(agent: &str) -> String {
    let mut slug = String::with_capacity(agent.len());
    for c in agent.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_end_matches('_');
    format!("{TRANSFER_PREFIX}{slug}")
}

pub fn transfer_definition(target: &AgentDefinition) -> ToolDefinition {
    let mut description = format!("Handoff to the {} agent to handle the request.", target.name);
    if !target.handoff_description.is_empty() {
        description.push(' ');
        description.push_str(&target.handoff_description);
    }
    ToolDefinition {
        name: transfer_tool_name(&target.name),
        description,
        parameters_schema: json!({"type": "object", "properties": {}, "additionalProperties": false}),
    }
}

/// Tool result fed back to the model after a transfer.
pub fn transfer_acknowledgement(target: &AgentDefinition) -> String {
    json!({ "assistant": target.name }).to_string()
}

pub struct HandoffRouter {
    agents: Arc<AgentRegistry>,
}

impl HandoffRouter {
    pub fn new(agents: Arc<AgentRegistry>) -> Self {
        Self { agents }
    }

    /// Interpret a tool call as a handoff signal.
    ///
    /// `None` when `tool` is not a transfer tool of any registered agent.
    /// A transfer to a registered agent that `from` does not declare is
    /// [`EngineError::HandoffTargetInvalid`].
    pub fn resolve(
        &self,
        from: &AgentDefinition,
        tool: &str,
    ) -> Option<Result<Arc<AgentDefinition>, EngineError>> {
        let target = self.agents.by_transfer_tool(tool)?;
        if from.can_hand_off_to(&target.name) {
            Some(Ok(target))
        } else {
            Some(Err(EngineError::HandoffTargetInvalid {
                from: from.name.clone(),
                to: target.name.clone(),
            }))
        }
    }

    /// Record the transition `from → to`: observers first, then the session log.
    pub fn transition(
        &self,
        from: &AgentDefinition,
        to: &AgentDefinition,
        session: &mut SessionContext,
        hooks: &HookDispatcher,
        turn_usage: TokenUsage,
    ) {
        info!(from = %from.name, to = %to.name, "handoff");
        hooks.handoff(&HookContext { session: &*session, turn_usage }, &from.name, &to.name);
        session.log_handoff(&from.name, &to.name);
    }
}
