use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use vita_core::context::LlmContext;
use vita_core::errors::GatewayError;
use vita_core::guardrails::{GuardrailRejection, GuardrailStage};
use vita_core::hooks::HookContext;
use vita_core::ids::SessionId;
use vita_core::messages::{AssistantMessage, Message, ToolCallBlock};
use vita_core::provider::{LlmProvider, StreamOptions};
use vita_core::session::SessionContext;
use vita_core::stream::StreamEvent;
use vita_core::tokens::TokenUsage;
use vita_core::tools::{ToolContext, ToolError};
use vita_settings::{GuardrailMode, StartingAgent, VitaSettings};

use crate::agents::{AgentDefinition, AgentRegistry};
use crate::emitter::FragmentSink;
use crate::error::EngineError;
use crate::guardrails::GuardrailEngine;
use crate::handoff::{transfer_acknowledgement, transfer_definition, HandoffRouter};
use crate::hooks::HookDispatcher;
use crate::invoker::{render_tool_error, ToolInvoker};
use crate::registry::ToolRegistry;

const EXTRA_HANDOFF_NOTICE: &str =
    "[error] Multiple handoffs requested in one response; only the first was followed.";

/// Limits and policies for turn execution.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub max_tool_rounds: u32,
    pub tool_timeout: Duration,
    pub max_tool_output_bytes: usize,
    pub guardrail_mode: GuardrailMode,
    pub guardrail_attempts: u32,
    pub starting_agent: StartingAgent,
    pub stream_buffer: usize,
    pub hook_failure_threshold: u32,
    pub stream_options: StreamOptions,
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &VitaSettings) -> Self {
        let runtime = &settings.runtime;
        Self {
            max_tool_rounds: runtime.max_tool_rounds,
            tool_timeout: Duration::from_millis(runtime.tool_timeout_ms),
            max_tool_output_bytes: runtime.max_tool_output_bytes,
            guardrail_mode: runtime.guardrail_mode,
            guardrail_attempts: runtime.guardrail_attempts,
            starting_agent: runtime.starting_agent,
            stream_buffer: runtime.stream_buffer,
            hook_failure_threshold: runtime.hook_failure_threshold,
            stream_options: StreamOptions {
                max_tokens: settings.provider.max_tokens,
                temperature: settings.provider.temperature,
                stop_sequences: Vec::new(),
            },
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_settings(&VitaSettings::default())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TurnReply {
    pub text: String,
    /// The agent that produced the final response.
    pub agent: String,
    pub usage: TokenUsage,
}

/// How a turn ended, short of a fatal error.
#[derive(Clone, Debug, PartialEq)]
pub enum TurnOutcome {
    Completed(TurnReply),
    Rejected(GuardrailRejection),
}

impl TurnOutcome {
    pub fn completed(text: impl Into<String>, agent: impl Into<String>, usage: TokenUsage) -> Self {
        Self::Completed(TurnReply {
            text: text.into(),
            agent: agent.into(),
            usage,
        })
    }

    /// What the user sees: the reply, or the fixed redirect for a rejection.
    pub fn text(&self) -> &str {
        match self {
            Self::Completed(reply) => &reply.text,
            Self::Rejected(rejection) => rejection.user_message(),
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    pub fn rejection(&self) -> Option<&GuardrailRejection> {
        match self {
            Self::Rejected(r) => Some(r),
            Self::Completed(_) => None,
        }
    }
}

/// Inputs for one turn.
pub struct TurnRequest<'a> {
    pub session_id: &'a SessionId,
    pub context: &'a mut SessionContext,
    /// Committed history; the turn works on a copy.
    pub history: &'a [Message],
    pub starting_agent: &'a str,
    pub prompt: &'a str,
    pub hooks: &'a HookDispatcher,
    pub sink: Option<&'a FragmentSink>,
    pub cancel: &'a CancellationToken,
}

#[derive(Debug)]
pub struct TurnResult {
    pub outcome: TurnOutcome,
    /// Working history including this turn. Commit only when completed.
    pub history: Vec<Message>,
    pub active_agent: String,
    pub usage: TokenUsage,
}

/// Per-turn working state.
struct Turn<'a> {
    session_id: &'a SessionId,
    context: &'a mut SessionContext,
    hooks: &'a HookDispatcher,
    sink: Option<&'a FragmentSink>,
    cancel: &'a CancellationToken,
    history: Vec<Message>,
    usage: TokenUsage,
    text: String,
    /// Deltas from an agent with output guardrails, withheld until they pass.
    held: Vec<String>,
    rounds: u32,
}

impl Turn<'_> {
    fn hook_ctx(&self) -> HookContext<'_> {
        HookContext {
            session: &*self.context,
            turn_usage: self.usage,
        }
    }

    async fn forward(&mut self, agent: &AgentDefinition, delta: String) -> Result<(), EngineError> {
        match self.sink {
            Some(_) if !agent.output_guardrails.is_empty() => {
                self.held.push(delta);
                Ok(())
            }
            Some(sink) => sink.send(delta).await,
            None => Ok(()),
        }
    }

    async fn release_held(&mut self) -> Result<(), EngineError> {
        let held = std::mem::take(&mut self.held);
        if let Some(sink) = self.sink {
            for delta in held {
                sink.send(delta).await?;
            }
        }
        Ok(())
    }
}

/// Drives turns: input guardrails → inference and tool rounds → handoffs →
/// output guardrails. Immutable and shared across sessions.
pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    agents: Arc<AgentRegistry>,
    invoker: ToolInvoker,
    guardrails: GuardrailEngine,
    router: HandoffRouter,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        agents: Arc<AgentRegistry>,
        tools: Arc<ToolRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            invoker: ToolInvoker::new(tools, config.tool_timeout, config.max_tool_output_bytes),
            guardrails: GuardrailEngine::new(
                Arc::clone(&provider),
                config.guardrail_mode,
                config.guardrail_attempts,
            ),
            router: HandoffRouter::new(Arc::clone(&agents)),
            provider,
            agents,
            config,
        }
    }

    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.agents
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Run one conversation turn.
    ///
    /// Guardrail rejections come back as [`TurnOutcome::Rejected`]; everything
    /// in [`EngineError`] is fatal and is also reported to the observers.
    #[instrument(skip_all, fields(session_id = %req.session_id, start = req.starting_agent))]
    pub async fn run_turn(&self, req: TurnRequest<'_>) -> Result<TurnResult, EngineError> {
        let mut turn = Turn {
            session_id: req.session_id,
            context: req.context,
            hooks: req.hooks,
            sink: req.sink,
            cancel: req.cancel,
            history: req.history.to_vec(),
            usage: TokenUsage::default(),
            text: String::new(),
            held: Vec::new(),
            rounds: 0,
        };

        match self.drive(&mut turn, req.starting_agent, req.prompt).await {
            Ok((outcome, agent)) => {
                info!(
                    agent = %agent.name,
                    rounds = turn.rounds,
                    tokens = turn.usage.total(),
                    rejected = outcome.is_rejected(),
                    "turn finished"
                );
                Ok(TurnResult {
                    outcome,
                    history: turn.history,
                    active_agent: agent.name.clone(),
                    usage: turn.usage,
                })
            }
            Err(EngineError::Aborted) => {
                debug!("turn aborted");
                Err(EngineError::Aborted)
            }
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "turn failed");
                turn.hooks.error(&turn.hook_ctx(), "run_turn", &e.to_string());
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        turn: &mut Turn<'_>,
        starting_agent: &str,
        prompt: &str,
    ) -> Result<(TurnOutcome, Arc<AgentDefinition>), EngineError> {
        let mut agent = self
            .agents
            .get(starting_agent)
            .ok_or_else(|| EngineError::UnknownAgent(starting_agent.to_string()))?;
        turn.history.push(Message::user_text(prompt));

        'agents: loop {
            if let Some(rejection) = self
                .check_guardrails(turn, &agent, GuardrailStage::Input, prompt)
                .await?
            {
                return Ok((TurnOutcome::Rejected(rejection), agent));
            }

            turn.hooks.agent_start(&turn.hook_ctx(), &agent.name);
            let mut agent_usage = TokenUsage::default();
            let mut agent_text = String::new();

            loop {
                let response = self.infer(turn, &agent).await?;
                if let Some(usage) = &response.usage {
                    turn.usage.add(usage);
                    agent_usage.add(usage);
                }
                let text = response.text_content();
                agent_text.push_str(&text);
                turn.text.push_str(&text);

                let calls: Vec<ToolCallBlock> = response.tool_calls().into_iter().cloned().collect();
                turn.history.push(Message::Assistant(response));
                if calls.is_empty() {
                    break;
                }

                turn.rounds += 1;
                if turn.rounds > self.config.max_tool_rounds {
                    return Err(EngineError::RoundLimitExceeded(self.config.max_tool_rounds));
                }

                if let Some(target) = self.dispatch_calls(turn, &agent, &calls).await? {
                    // Output checks apply to the final agent only.
                    turn.release_held().await?;
                    turn.hooks
                        .agent_end(&turn.hook_ctx(), &agent.name, &agent_text, agent_usage);
                    self.router
                        .transition(&agent, &target, &mut *turn.context, turn.hooks, turn.usage);
                    agent = target;
                    continue 'agents;
                }
            }

            turn.hooks
                .agent_end(&turn.hook_ctx(), &agent.name, &agent_text, agent_usage);

            if let Some(rejection) = self
                .check_guardrails(turn, &agent, GuardrailStage::Output, &agent_text)
                .await?
            {
                turn.held.clear();
                return Ok((TurnOutcome::Rejected(rejection), agent));
            }
            turn.release_held().await?;

            let outcome = TurnOutcome::completed(turn.text.clone(), agent.name.clone(), turn.usage);
            return Ok((outcome, agent));
        }
    }

    async fn check_guardrails(
        &self,
        turn: &Turn<'_>,
        agent: &AgentDefinition,
        stage: GuardrailStage,
        text: &str,
    ) -> Result<Option<GuardrailRejection>, EngineError> {
        let specs = match stage {
            GuardrailStage::Input => &agent.input_guardrails,
            GuardrailStage::Output => &agent.output_guardrails,
        };
        if specs.is_empty() {
            return Ok(None);
        }
        let verdict = self.guardrails.evaluate(specs, text, turn.cancel).await?;
        if verdict.passed {
            return Ok(None);
        }
        let rejection = GuardrailRejection::from_result(stage, &agent.name, verdict);
        info!(
            agent = %agent.name,
            stage = stage.as_str(),
            guardrail = %rejection.guardrail,
            "guardrail rejected turn"
        );
        turn.hooks.guardrail_violation(&turn.hook_ctx(), &rejection);
        Ok(Some(rejection))
    }

    fn build_context(&self, agent: &AgentDefinition, session: &SessionContext, history: &[Message]) -> LlmContext {
        let mut tools = self.invoker.registry().definitions_for(&agent.tools);
        tools.extend(
            agent
                .handoff_targets
                .iter()
                .filter_map(|name| self.agents.get(name))
                .map(|target| transfer_definition(&target)),
        );
        LlmContext {
            messages: history.to_vec(),
            instructions: agent.instructions.resolve(session),
            tools,
            output_schema: None,
        }
    }

    /// One inference call. Text deltas go to the sink as they arrive, or are
    /// held back when the agent's output still has to be checked.
    #[instrument(skip_all, fields(agent = %agent.name))]
    async fn infer(&self, turn: &mut Turn<'_>, agent: &AgentDefinition) -> Result<AssistantMessage, EngineError> {
        let ctx = self.build_context(agent, turn.context, &turn.history);
        let cancel = turn.cancel;

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Aborted),
            s = self.provider.stream(&ctx, &self.config.stream_options) => s?,
        };

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineError::Aborted),
                ev = stream.next() => ev,
            };
            match event {
                Some(StreamEvent::TextDelta { delta }) => turn.forward(agent, delta).await?,
                Some(StreamEvent::Done { message, stop_reason }) => {
                    debug!(?stop_reason, "inference finished");
                    return Ok(message);
                }
                Some(StreamEvent::Error { error }) => return Err(error.into()),
                Some(_) => {}
                None => {
                    return Err(GatewayError::StreamInterrupted(
                        "stream ended without a completion".into(),
                    )
                    .into())
                }
            }
        }
    }

    /// Execute one response's tool calls in order. Returns the handoff
    /// target if the response asked for one.
    async fn dispatch_calls(
        &self,
        turn: &mut Turn<'_>,
        agent: &AgentDefinition,
        calls: &[ToolCallBlock],
    ) -> Result<Option<Arc<AgentDefinition>>, EngineError> {
        let mut handoff: Option<Arc<AgentDefinition>> = None;

        for call in calls {
            if let Some(target) = self.router.resolve(agent, &call.name) {
                let target = target?;
                if handoff.is_some() {
                    turn.history.push(Message::tool_result(
                        call.id.clone(),
                        call.name.clone(),
                        EXTRA_HANDOFF_NOTICE,
                        true,
                    ));
                } else {
                    turn.history.push(Message::tool_result(
                        call.id.clone(),
                        call.name.clone(),
                        transfer_acknowledgement(&target),
                        false,
                    ));
                    handoff = Some(target);
                }
                continue;
            }

            turn.hooks.tool_start(&turn.hook_ctx(), &agent.name, &call.name);
            let result = {
                let mut ctx = ToolContext {
                    session_id: turn.session_id,
                    agent: &agent.name,
                    session: &mut *turn.context,
                    abort_signal: turn.cancel.clone(),
                };
                self.invoker.invoke(call, &agent.tools, &mut ctx).await
            };
            let (content, is_error) = match result {
                Ok(r) if r.is_error => (format!("[error] {}", r.content), true),
                Ok(r) => (r.content, false),
                Err(ToolError::Cancelled) => return Err(EngineError::Aborted),
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "tool call failed");
                    (render_tool_error(&e), true)
                }
            };
            turn.hooks
                .tool_end(&turn.hook_ctx(), &agent.name, &call.name, &content, is_error);
            turn.history
                .push(Message::tool_result(call.id.clone(), call.name.clone(), content, is_error));
        }

        Ok(handoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use vita_core::context::OutputSchema;
    use vita_core::hooks::{HookType, RunHooks};
    use vita_core::tools::{Tool, ToolResult};
    use vita_llm::mock::{MockProvider, MockResponse, MOCK_USAGE};
    use vita_telemetry::SessionTelemetry;

    use crate::emitter::fragment_channel;
    use crate::guardrails::{GuardrailSpec, TripwirePolicy};

    struct RecordMeal;

    #[async_trait]
    impl Tool for RecordMeal {
        fn name(&self) -> &str {
            "record_meal"
        }
        fn description(&self) -> &str {
            "Record a logged meal"
        }
        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {"meal": {"type": "string"}},
                "required": ["meal"]
            })
        }
        async fn execute(&self, args: Value, _ctx: &mut ToolContext<'_>) -> Result<ToolResult, ToolError> {
            let meal = args["meal"].as_str().unwrap_or_default();
            Ok(ToolResult::text(format!("logged {meal}")))
        }
    }

    fn relevance_guardrail() -> Arc<GuardrailSpec> {
        Arc::new(GuardrailSpec::new(
            "health_relevance",
            "Is this about health?",
            OutputSchema { name: "Relevance".into(), schema: json!({"type": "object"}) },
            TripwirePolicy::RequireTrue { field: "is_health_related".into() },
        ))
    }

    fn tools() -> Arc<ToolRegistry> {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(RecordMeal)).unwrap();
        Arc::new(tools)
    }

    fn build(provider: Arc<MockProvider>, agents: Vec<AgentDefinition>, config: OrchestratorConfig) -> Orchestrator {
        let tools = tools();
        let registry = AgentRegistry::new("Planner", agents, &tools).unwrap();
        Orchestrator::new(provider, Arc::new(registry), tools, config)
    }

    fn planner() -> AgentDefinition {
        AgentDefinition::new("Planner", "You plan.")
            .with_tools(["record_meal"])
            .with_handoffs(["Nutrition"])
    }

    fn nutrition() -> AgentDefinition {
        AgentDefinition::new("Nutrition", "You advise on food.")
    }

    struct Harness {
        session_id: SessionId,
        context: SessionContext,
        telemetry: Arc<SessionTelemetry>,
        hooks: HookDispatcher,
        cancel: CancellationToken,
    }

    impl Harness {
        fn new() -> Self {
            let telemetry = Arc::new(SessionTelemetry::new("test"));
            let observer: Arc<dyn RunHooks> = telemetry.clone();
            Self {
                session_id: SessionId::new(),
                context: SessionContext::new("Ada", "u1"),
                telemetry,
                hooks: HookDispatcher::new(vec![observer], 3),
                cancel: CancellationToken::new(),
            }
        }

        async fn run(
            &mut self,
            orchestrator: &Orchestrator,
            prompt: &str,
            sink: Option<&FragmentSink>,
        ) -> Result<TurnResult, EngineError> {
            orchestrator
                .run_turn(TurnRequest {
                    session_id: &self.session_id,
                    context: &mut self.context,
                    history: &[],
                    starting_agent: "Planner",
                    prompt,
                    hooks: &self.hooks,
                    sink,
                    cancel: &self.cancel,
                })
                .await
        }

        fn event_types(&self) -> Vec<HookType> {
            self.telemetry.events().into_iter().map(|e| e.event_type).collect()
        }
    }

    #[tokio::test]
    async fn plain_reply_completes() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::stream_text("Drink water.")]));
        let orchestrator = build(provider.clone(), vec![planner(), nutrition()], OrchestratorConfig::default());
        let mut h = Harness::new();

        let result = h.run(&orchestrator, "hydration tips?", None).await.unwrap();
        assert_eq!(result.outcome.text(), "Drink water.");
        assert_eq!(result.active_agent, "Planner");
        assert_eq!(result.usage, MOCK_USAGE);
        assert_eq!(result.history.len(), 2);
        assert_eq!(h.event_types(), vec![HookType::AgentStart, HookType::AgentEnd]);

        let request = &provider.requests()[0];
        assert_eq!(request.instructions, "You plan.");
        let offered: Vec<&str> = request.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(offered, vec!["record_meal", "transfer_to_nutrition"]);
    }

    #[tokio::test]
    async fn input_rejection_skips_the_agent() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::structured(
            json!({"is_health_related": false, "reasoning": "asks about stocks"}),
        )]));
        let agents = vec![planner().with_input_guardrail(relevance_guardrail()), nutrition()];
        let orchestrator = build(provider.clone(), agents, OrchestratorConfig::default());
        let mut h = Harness::new();

        let result = h.run(&orchestrator, "best stocks?", None).await.unwrap();
        let rejection = result.outcome.rejection().unwrap();
        assert_eq!(rejection.stage, GuardrailStage::Input);
        assert_eq!(rejection.guardrail, "health_relevance");
        assert_eq!(provider.call_count(), 1);
        assert_eq!(h.event_types(), vec![HookType::GuardrailViolation]);
    }

    #[tokio::test]
    async fn tool_round_feeds_result_back() {
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::tool_call("record_meal", json!({"meal": "oats"})),
            MockResponse::stream_text("Logged your oats."),
        ]));
        let orchestrator = build(provider.clone(), vec![planner(), nutrition()], OrchestratorConfig::default());
        let mut h = Harness::new();

        let result = h.run(&orchestrator, "I ate oats", None).await.unwrap();
        assert_eq!(result.outcome.text(), "Logged your oats.");
        assert_eq!(result.history.len(), 4);
        match &result.history[2] {
            Message::ToolResult(r) => {
                assert_eq!(r.content, "logged oats");
                assert!(!r.is_error);
            }
            other => panic!("expected tool result, got {other:?}"),
        }
        let mut expected_usage = MOCK_USAGE;
        expected_usage.add(&MOCK_USAGE);
        assert_eq!(result.usage, expected_usage);
        assert_eq!(provider.requests()[1].messages.len(), 3);
        assert_eq!(h.telemetry.summarize().tool_usage.get("record_meal"), Some(&1));
    }

    #[tokio::test]
    async fn invalid_arguments_are_reported_to_the_model() {
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::tool_call("record_meal", json!({"food": "oats"})),
            MockResponse::stream_text("Which meal?"),
        ]));
        let orchestrator = build(provider, vec![planner(), nutrition()], OrchestratorConfig::default());
        let mut h = Harness::new();

        let result = h.run(&orchestrator, "log it", None).await.unwrap();
        match &result.history[2] {
            Message::ToolResult(r) => {
                assert!(r.is_error);
                assert!(r.content.starts_with("[error]"));
            }
            other => panic!("expected tool result, got {other:?}"),
        }
        assert_eq!(result.outcome.text(), "Which meal?");
    }

    #[tokio::test]
    async fn handoff_switches_agent_and_keeps_history() {
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::tool_call("transfer_to_nutrition", json!({})),
            MockResponse::stream_text("Nutrition here."),
        ]));
        let orchestrator = build(provider.clone(), vec![planner(), nutrition()], OrchestratorConfig::default());
        let mut h = Harness::new();

        let result = h.run(&orchestrator, "meal ideas", None).await.unwrap();
        assert_eq!(result.active_agent, "Nutrition");
        assert_eq!(result.outcome.text(), "Nutrition here.");
        assert_eq!(h.context.handoff_log, vec!["Planner → Nutrition".to_string()]);

        let second = &provider.requests()[1];
        assert_eq!(second.instructions, "You advise on food.");
        assert_eq!(second.messages, result.history[..3].to_vec());
        match &second.messages[2] {
            Message::ToolResult(r) => assert_eq!(r.content, r#"{"assistant":"Nutrition"}"#),
            other => panic!("expected acknowledgement, got {other:?}"),
        }

        assert_eq!(
            h.event_types(),
            vec![
                HookType::AgentStart,
                HookType::AgentEnd,
                HookType::Handoff,
                HookType::AgentStart,
                HookType::AgentEnd,
            ]
        );
        assert_eq!(h.telemetry.summarize().handoff_history.len(), 1);
    }

    #[tokio::test]
    async fn handoff_target_checks_the_original_prompt() {
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::tool_call("transfer_to_nutrition", json!({})),
            MockResponse::structured(json!({"is_health_related": false, "reasoning": "not about food"})),
            MockResponse::stream_text("unreachable"),
        ]));
        let agents = vec![planner(), nutrition().with_input_guardrail(relevance_guardrail())];
        let orchestrator = build(provider.clone(), agents, OrchestratorConfig::default());
        let mut h = Harness::new();

        let result = h.run(&orchestrator, "meal ideas", None).await.unwrap();
        let rejection = result.outcome.rejection().unwrap();
        assert_eq!(rejection.stage, GuardrailStage::Input);
        assert_eq!(rejection.agent, "Nutrition");
        assert_eq!(result.active_agent, "Nutrition");
        assert_eq!(h.context.handoff_log, vec!["Planner → Nutrition".to_string()]);

        assert_eq!(provider.call_count(), 2);
        let check = &provider.requests()[1];
        assert_eq!(check.output_schema.as_ref().map(|s| s.name.as_str()), Some("Relevance"));
        assert_eq!(check.messages, vec![Message::user_text("meal ideas")]);
        assert_eq!(
            h.event_types(),
            vec![
                HookType::AgentStart,
                HookType::AgentEnd,
                HookType::Handoff,
                HookType::GuardrailViolation,
            ]
        );
    }

    #[tokio::test]
    async fn unguarded_target_is_not_rechecked() {
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::structured(json!({"is_health_related": true, "reasoning": "food"})),
            MockResponse::tool_call("transfer_to_nutrition", json!({})),
            MockResponse::stream_text("Nutrition here."),
        ]));
        let agents = vec![planner().with_input_guardrail(relevance_guardrail()), nutrition()];
        let orchestrator = build(provider.clone(), agents, OrchestratorConfig::default());
        let mut h = Harness::new();

        let result = h.run(&orchestrator, "meal ideas", None).await.unwrap();
        assert_eq!(result.outcome.text(), "Nutrition here.");
        assert_eq!(provider.call_count(), 3);
        let classifier_calls = provider.requests().iter().filter(|r| r.output_schema.is_some()).count();
        assert_eq!(classifier_calls, 1);
    }

    #[tokio::test]
    async fn undeclared_handoff_is_fatal() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::tool_call(
            "transfer_to_planner",
            json!({}),
        )]));
        let agents = vec![planner(), nutrition()];
        let tools = tools();
        let registry = AgentRegistry::new("Nutrition", agents, &tools).unwrap();
        let orchestrator = Orchestrator::new(provider, Arc::new(registry), tools, OrchestratorConfig::default());
        let mut h = Harness::new();

        let err = orchestrator
            .run_turn(TurnRequest {
                session_id: &h.session_id,
                context: &mut h.context,
                history: &[],
                starting_agent: "Nutrition",
                prompt: "back to planning",
                hooks: &h.hooks,
                sink: None,
                cancel: &h.cancel,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::HandoffTargetInvalid { .. }));
        assert!(h.context.handoff_log.is_empty());
        assert_eq!(h.telemetry.summarize().error_count, 1);
    }

    #[tokio::test]
    async fn round_limit_stops_tool_loops() {
        let provider = Arc::new(MockProvider::from_fn(|_| {
            MockResponse::tool_call("record_meal", json!({"meal": "again"}))
        }));
        let config = OrchestratorConfig { max_tool_rounds: 2, ..OrchestratorConfig::default() };
        let orchestrator = build(provider.clone(), vec![planner(), nutrition()], config);
        let mut h = Harness::new();

        let err = h.run(&orchestrator, "loop", None).await.unwrap_err();
        assert!(matches!(err, EngineError::RoundLimitExceeded(2)));
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn output_rejection_replaces_reply() {
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::stream_text("Skip all meals."),
            MockResponse::structured(json!({"is_health_related": false, "reasoning": "unsafe"})),
        ]));
        let agents = vec![planner().with_output_guardrail(relevance_guardrail()), nutrition()];
        let orchestrator = build(provider, agents, OrchestratorConfig::default());
        let mut h = Harness::new();

        let result = h.run(&orchestrator, "diet advice", None).await.unwrap();
        let rejection = result.outcome.rejection().unwrap();
        assert_eq!(rejection.stage, GuardrailStage::Output);
        assert_eq!(result.outcome.text(), rejection.user_message());
        assert_ne!(result.outcome.text(), "Skip all meals.");
    }

    #[tokio::test]
    async fn streamed_fragments_match_reply() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::stream_chunks(&[
            "Walk ", "every ", "day.",
        ])]));
        let orchestrator = build(provider, vec![planner(), nutrition()], OrchestratorConfig::default());
        let mut h = Harness::new();
        let (sink, mut rx) = fragment_channel(16, h.cancel.clone());

        let result = h.run(&orchestrator, "exercise?", Some(&sink)).await.unwrap();
        drop(sink);
        let mut streamed = String::new();
        while let Some(fragment) = rx.recv().await {
            streamed.push_str(&fragment);
        }
        assert_eq!(streamed, "Walk every day.");
        assert_eq!(result.outcome.text(), streamed);
    }

    #[tokio::test]
    async fn guarded_output_is_withheld_from_the_sink_on_rejection() {
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::stream_chunks(&["Skip ", "all meals."]),
            MockResponse::structured(json!({"is_health_related": false, "reasoning": "unsafe"})),
        ]));
        let agents = vec![planner().with_output_guardrail(relevance_guardrail()), nutrition()];
        let orchestrator = build(provider, agents, OrchestratorConfig::default());
        let mut h = Harness::new();
        let (sink, mut rx) = fragment_channel(16, h.cancel.clone());

        let result = h.run(&orchestrator, "diet advice", Some(&sink)).await.unwrap();
        drop(sink);
        assert!(result.outcome.is_rejected());
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn gateway_failure_is_reported() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::stream_error(
            GatewayError::ProviderOverloaded,
        )]));
        let orchestrator = build(provider, vec![planner(), nutrition()], OrchestratorConfig::default());
        let mut h = Harness::new();

        let err = h.run(&orchestrator, "hello", None).await.unwrap_err();
        assert!(matches!(err, EngineError::Gateway(GatewayError::ProviderOverloaded)));
        assert_eq!(h.telemetry.summarize().error_count, 1);
    }

    #[tokio::test]
    async fn cancellation_aborts_mid_stream() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::hang_after(&["Thinking"])]));
        let orchestrator = build(provider.clone(), vec![planner(), nutrition()], OrchestratorConfig::default());
        let mut h = Harness::new();
        let (sink, mut rx) = fragment_channel(4, h.cancel.clone());
        let cancel = h.cancel.clone();

        let consumer = tokio::spawn(async move {
            let first = rx.recv().await;
            cancel.cancel();
            first
        });
        let err = h.run(&orchestrator, "plan", Some(&sink)).await.unwrap_err();
        assert!(matches!(err, EngineError::Aborted));
        assert_eq!(consumer.await.unwrap().as_deref(), Some("Thinking"));
        assert_eq!(provider.open_streams(), 0);
        assert_eq!(h.telemetry.summarize().error_count, 0);
    }
}
