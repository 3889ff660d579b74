use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tracing::{error, instrument, warn};

use vita_core::messages::ToolCallBlock;
use vita_core::tools::{ToolContext, ToolError, ToolResult};

use crate::registry::ToolRegistry;
use crate::schema;
use crate::truncate::truncate_output;

/// Validates and executes tool calls on behalf of the active agent.
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
    max_output_bytes: usize,
}

impl ToolInvoker {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            registry,
            timeout,
            max_output_bytes,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Run `call` if `offered` includes it and its arguments match the schema.
    ///
    /// Execution races the timeout and the context's abort signal; panics
    /// are caught and reported as execution failures.
    #[instrument(skip_all, fields(tool = %call.name, agent = ctx.agent))]
    pub async fn invoke(
        &self,
        call: &ToolCallBlock,
        offered: &[String],
        ctx: &mut ToolContext<'_>,
    ) -> Result<ToolResult, ToolError> {
        if !offered.iter().any(|t| t == &call.name) {
            return Err(ToolError::UnknownTool(call.name.clone()));
        }
        let tool = self
            .registry
            .get(&call.name)
            .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;

        schema::validate(&tool.parameters_schema(), &call.arguments)
            .map_err(ToolError::InvalidArguments)?;

        let cancel = ctx.abort_signal.clone();
        let start = Instant::now();
        let run = AssertUnwindSafe(tool.execute(call.arguments.clone(), ctx)).catch_unwind();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ToolError::Cancelled),
            r = tokio::time::timeout(self.timeout, run) => r,
        };

        let mut result = match outcome {
            Ok(Ok(result)) => result?,
            Ok(Err(panic)) => {
                let msg = panic_message(&panic);
                error!(panic = %msg, "tool panicked during execution");
                return Err(ToolError::ExecutionFailed("internal error: tool crashed".into()));
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "tool timed out");
                return Err(ToolError::Timeout(self.timeout));
            }
        };

        if result.content.len() > self.max_output_bytes {
            result.content = truncate_output(&result.content, self.max_output_bytes).into_owned();
        }
        result.duration = start.elapsed();
        Ok(result)
    }
}

/// Render a tool failure as the tool-result text the model sees.
pub fn render_tool_error(err: &ToolError) -> String {
    match err {
        ToolError::EffectApplied(detail) => format!(
            "[error] The action was completed, but its result could not be reported ({detail}). \
             Do not repeat the action."
        ),
        ToolError::Timeout(d) => format!("[error] Tool timed out after {}s", d.as_secs()),
        other => format!("[error] {other}"),
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;
    use vita_core::ids::{SessionId, ToolCallId};
    use vita_core::session::{InjuryNote, SessionContext};
    use vita_core::tools::Tool;

    struct AddInjury;

    #[async_trait]
    impl Tool for AddInjury {
        fn name(&self) -> &str {
            "add_injury_note"
        }
        fn description(&self) -> &str {
            "Record an injury"
        }
        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {"description": {"type": "string"}},
                "required": ["description"],
                "additionalProperties": false
            })
        }
        async fn execute(&self, args: Value, ctx: &mut ToolContext<'_>) -> Result<ToolResult, ToolError> {
            let description = args["description"].as_str().unwrap_or_default().to_string();
            ctx.session.injury_notes.push(InjuryNote {
                injury_description: description,
                severity_level: "mild".into(),
                affected_body_parts: vec![],
                restrictions: vec![],
                notes: None,
            });
            Ok(ToolResult::text("x".repeat(500)))
        }
    }

    struct Sleepy;

    #[async_trait]
    impl Tool for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }
        fn description(&self) -> &str {
            "never returns in time"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _args: Value, _ctx: &mut ToolContext<'_>) -> Result<ToolResult, ToolError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ToolResult::text("late"))
        }
    }

    struct Crashy;

    #[async_trait]
    impl Tool for Crashy {
        fn name(&self) -> &str {
            "crashy"
        }
        fn description(&self) -> &str {
            "panics"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _args: Value, _ctx: &mut ToolContext<'_>) -> Result<ToolResult, ToolError> {
            panic!("index out of bounds");
        }
    }

    fn invoker() -> ToolInvoker {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(AddInjury)).unwrap();
        reg.register(Arc::new(Sleepy)).unwrap();
        reg.register(Arc::new(Crashy)).unwrap();
        ToolInvoker::new(Arc::new(reg), Duration::from_secs(5), 100)
    }

    fn call(name: &str, arguments: Value) -> ToolCallBlock {
        ToolCallBlock { id: ToolCallId::new(), name: name.into(), arguments }
    }

    fn all() -> Vec<String> {
        vec!["add_injury_note".into(), "sleepy".into(), "crashy".into()]
    }

    async fn run(inv: &ToolInvoker, call: ToolCallBlock, offered: &[String], session: &mut SessionContext, cancel: CancellationToken) -> Result<ToolResult, ToolError> {
        let sid = SessionId::new();
        let mut ctx = ToolContext { session_id: &sid, agent: "InjurySupportAgent", session, abort_signal: cancel };
        inv.invoke(&call, offered, &mut ctx).await
    }

    #[tokio::test]
    async fn executes_mutates_and_truncates() {
        let inv = invoker();
        let mut session = SessionContext::new("Ada", "1");
        let result = run(&inv, call("add_injury_note", json!({"description": "sprained ankle"})), &all(), &mut session, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(session.injury_notes.len(), 1);
        assert!(result.content.contains("[truncated: 500 bytes -> 100 bytes]"));
    }

    #[tokio::test]
    async fn tools_not_offered_are_unknown() {
        let inv = invoker();
        let mut session = SessionContext::new("Ada", "1");
        let err = run(&inv, call("add_injury_note", json!({"description": "x"})), &["sleepy".to_string()], &mut session, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));
        let err = run(&inv, call("nope", json!({})), &["nope".to_string()], &mut session, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn invalid_arguments_never_run() {
        let inv = invoker();
        let mut session = SessionContext::new("Ada", "1");
        let err = run(&inv, call("add_injury_note", json!({"desc": "typo"})), &all(), &mut session, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(session.injury_notes.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_and_cancel() {
        let inv = invoker();
        let mut session = SessionContext::new("Ada", "1");
        let err = run(&inv, call("sleepy", json!({})), &all(), &mut session, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout(d) if d == Duration::from_secs(5)));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = run(&inv, call("sleepy", json!({})), &all(), &mut session, cancel).await.unwrap_err();
        assert!(matches!(err, ToolError::Cancelled));
    }

    #[tokio::test]
    async fn panics_are_contained() {
        let inv = invoker();
        let mut session = SessionContext::new("Ada", "1");
        let err = run(&inv, call("crashy", json!({})), &all(), &mut session, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed(ref m) if m.contains("crashed")));
    }

    #[test]
    fn effect_applied_tells_model_not_to_repeat() {
        let text = render_tool_error(&ToolError::EffectApplied("encoding failed".into()));
        assert!(text.starts_with("[error]"));
        assert!(text.contains("Do not repeat"));
        assert_eq!(
            render_tool_error(&ToolError::InvalidArguments("$.diet: bad".into())),
            "[error] invalid arguments: $.diet: bad"
        );
    }
}
