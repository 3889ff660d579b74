//! Per-session lifecycle recorder.
//!
//! [`SessionTelemetry`] is a [`RunHooks`] observer owned by exactly one session.
//! It keeps an ordered event log plus the aggregates reported by
//! [`SessionTelemetry::summarize`].

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use vita_core::guardrails::GuardrailRejection;
use vita_core::hooks::{HookContext, HookType, RunHooks};
use vita_core::tokens::TokenUsage;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    /// Monotonic per-session sequence number, starting at 1.
    pub event_id: u64,
    pub timestamp: String,
    pub event_type: HookType,
    /// Seconds since the session started, two decimals.
    pub session_duration: f64,
    pub details: Value,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPerformance {
    pub start_count: u64,
    pub total_tokens: u64,
    pub last_used: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffRecord {
    pub timestamp: String,
    pub from_agent: String,
    pub to_agent: String,
    pub user_name: String,
    /// Tokens consumed in the turn at the moment of transfer.
    pub total_tokens: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub method: String,
    pub error: String,
    pub timestamp: String,
    pub context: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_duration_seconds: f64,
    pub total_events: u64,
    pub agent_performance: BTreeMap<String, AgentPerformance>,
    pub tool_usage: BTreeMap<String, u64>,
    pub handoff_history: Vec<HandoffRecord>,
    pub error_count: usize,
    pub errors: Option<Vec<ErrorRecord>>,
}

impl SessionSummary {
    pub fn total_tokens(&self) -> u64 {
        self.agent_performance.values().map(|a| a.total_tokens).sum()
    }

    pub fn tool_calls(&self) -> u64 {
        self.tool_usage.values().sum()
    }
}

struct State {
    events: Vec<TelemetryEvent>,
    agent_performance: BTreeMap<String, AgentPerformance>,
    tool_usage: BTreeMap<String, u64>,
    handoff_history: Vec<HandoffRecord>,
    errors: Vec<ErrorRecord>,
    last_event_at: Option<Instant>,
    closed_at: Option<Instant>,
}

pub struct SessionTelemetry {
    session_label: String,
    started: Instant,
    state: Mutex<State>,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

impl SessionTelemetry {
    pub fn new(session_label: impl Into<String>) -> Self {
        Self {
            session_label: session_label.into(),
            started: Instant::now(),
            state: Mutex::new(State {
                events: Vec::new(),
                agent_performance: BTreeMap::new(),
                tool_usage: BTreeMap::new(),
                handoff_history: Vec::new(),
                errors: Vec::new(),
                last_event_at: None,
                closed_at: None,
            }),
        }
    }

    fn log_event(&self, state: &mut State, event_type: HookType, details: Value) {
        let now = Instant::now();
        let event = TelemetryEvent {
            event_id: state.events.len() as u64 + 1,
            timestamp: Utc::now().to_rfc3339(),
            event_type,
            session_duration: round2(now.duration_since(self.started).as_secs_f64()),
            details,
        };
        info!(
            session = %self.session_label,
            event_id = event.event_id,
            event_type = event_type.as_str(),
            details = %event.details,
            "telemetry event"
        );
        state.events.push(event);
        state.last_event_at = Some(now);
    }

    fn log_error(&self, state: &mut State, method: &str, error: &str, context: Value) {
        warn!(session = %self.session_label, method, error, "hook error");
        state.errors.push(ErrorRecord {
            method: method.to_string(),
            error: error.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            context: context.clone(),
        });
        self.log_event(state, HookType::Error, json!({"method": method, "error": error, "context": context}));
    }

    /// Ordered copy of every recorded event.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.state.lock().events.clone()
    }

    /// Freeze the session clock. Later summaries report the same duration.
    pub fn close(&self) -> SessionSummary {
        {
            let mut state = self.state.lock();
            if state.closed_at.is_none() {
                state.closed_at = Some(Instant::now());
            }
        }
        self.summarize()
    }

    /// Build the session summary. Does not mutate state; the duration runs to
    /// the latest event (or to close), so repeated calls agree exactly.
    pub fn summarize(&self) -> SessionSummary {
        let state = self.state.lock();
        let end = state.closed_at.or(state.last_event_at).unwrap_or(self.started);
        SessionSummary {
            session_duration_seconds: round2(end.duration_since(self.started).as_secs_f64()),
            total_events: state.events.len() as u64,
            agent_performance: state.agent_performance.clone(),
            tool_usage: state.tool_usage.clone(),
            handoff_history: state.handoff_history.clone(),
            error_count: state.errors.len(),
            errors: if state.errors.is_empty() { None } else { Some(state.errors.clone()) },
        }
    }
}

impl RunHooks for SessionTelemetry {
    fn on_agent_start(&self, ctx: &HookContext<'_>, agent: &str) {
        let mut state = self.state.lock();
        let perf = state.agent_performance.entry(agent.to_string()).or_default();
        perf.start_count += 1;
        perf.last_used = Some(Utc::now().to_rfc3339());
        let details = json!({
            "agent_name": agent,
            "user_name": ctx.session.name(),
            "user_uid": ctx.session.uid(),
            "current_tokens": ctx.turn_usage.total(),
            "progress_entries": ctx.session.progress_log.len(),
            "handoff_count": ctx.session.handoff_log.len(),
        });
        self.log_event(&mut state, HookType::AgentStart, details);
    }

    fn on_agent_end(&self, ctx: &HookContext<'_>, agent: &str, output: &str, agent_usage: TokenUsage) {
        let mut state = self.state.lock();
        let Some(perf) = state.agent_performance.get_mut(agent) else {
            self.log_error(
                &mut state,
                "on_agent_end",
                "agent ended without a recorded start",
                json!({"agent_name": agent}),
            );
            return;
        };
        perf.total_tokens += agent_usage.total();
        let details = json!({
            "agent_name": agent,
            "user_name": ctx.session.name(),
            "final_tokens": ctx.turn_usage.total(),
            "agent_tokens": agent_usage.total(),
            "output_length": output.chars().count(),
        });
        self.log_event(&mut state, HookType::AgentEnd, details);
    }

    fn on_tool_start(&self, ctx: &HookContext<'_>, agent: &str, tool: &str) {
        let mut state = self.state.lock();
        let count = {
            let c = state.tool_usage.entry(tool.to_string()).or_insert(0);
            *c += 1;
            *c
        };
        let details = json!({
            "agent_name": agent,
            "tool_name": tool,
            "user_name": ctx.session.name(),
            "tool_usage_count": count,
            "current_tokens": ctx.turn_usage.total(),
        });
        self.log_event(&mut state, HookType::ToolStart, details);
    }

    fn on_tool_end(&self, ctx: &HookContext<'_>, agent: &str, tool: &str, result: &str, is_error: bool) {
        let mut state = self.state.lock();
        let details = json!({
            "agent_name": agent,
            "tool_name": tool,
            "user_name": ctx.session.name(),
            "result_length": result.chars().count(),
            "is_error": is_error,
            "final_tokens": ctx.turn_usage.total(),
        });
        self.log_event(&mut state, HookType::ToolEnd, details);
    }

    fn on_handoff(&self, ctx: &HookContext<'_>, from: &str, to: &str) {
        let mut state = self.state.lock();
        state.handoff_history.push(HandoffRecord {
            timestamp: Utc::now().to_rfc3339(),
            from_agent: from.to_string(),
            to_agent: to.to_string(),
            user_name: ctx.session.name().to_string(),
            total_tokens: ctx.turn_usage.total(),
        });
        let details = json!({
            "from_agent": from,
            "to_agent": to,
            "user_name": ctx.session.name(),
            "handoff_reason": format!("Specialized expertise needed: {to}"),
            "total_handoffs": state.handoff_history.len(),
            "current_tokens": ctx.turn_usage.total(),
        });
        self.log_event(&mut state, HookType::Handoff, details);
    }

    fn on_guardrail_violation(&self, ctx: &HookContext<'_>, rejection: &GuardrailRejection) {
        let mut state = self.state.lock();
        let details = json!({
            "agent_name": rejection.agent,
            "stage": rejection.stage.as_str(),
            "guardrail": rejection.guardrail,
            "reasoning": rejection.reasoning,
            "category": rejection.category,
            "confidence": rejection.confidence,
            "user_name": ctx.session.name(),
        });
        self.log_event(&mut state, HookType::GuardrailViolation, details);
    }

    fn on_error(&self, ctx: &HookContext<'_>, method: &str, error: &str) {
        let mut state = self.state.lock();
        let context = json!({
            "user_name": ctx.session.name(),
            "current_tokens": ctx.turn_usage.total(),
        });
        self.log_error(&mut state, method, error, context);
    }
}
