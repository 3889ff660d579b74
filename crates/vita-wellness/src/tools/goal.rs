use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use vita_core::context::{LlmContext, OutputSchema};
use vita_core::provider::LlmProvider;
use vita_core::session::Goal;
use vita_core::tools::{Tool, ToolContext, ToolError, ToolResult};
use vita_engine::error::EngineError;
use vita_engine::guardrails::{GuardrailEngine, GuardrailSpec};
use vita_engine::structured::run_structured_as;

use super::{parse_args, structured_failure};

const INSTRUCTIONS: &str = "You are a goal analyzer. Take the user's raw, unstructured goal and convert it \
    into a structured goal. Carefully extract the action (lose, gain or maintain), the quantity, the unit \
    (kg, lbs or %), the duration and the timeframe unit (days, weeks or months). Answer with the JSON \
    object only.";

pub fn goal_schema() -> OutputSchema {
    OutputSchema {
        name: "Goal".into(),
        schema: json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "enum": ["lose", "gain", "maintain"]},
                "quantity": {"type": "number", "minimum": 0},
                "unit": {"type": "string", "enum": ["kg", "lbs", "%"]},
                "duration": {"type": "integer", "minimum": 1},
                "timeframe_unit": {"type": "string", "enum": ["days", "weeks", "months"]}
            },
            "required": ["action", "quantity", "unit", "duration", "timeframe_unit"],
            "additionalProperties": false
        }),
    }
}

#[derive(Debug, Deserialize)]
struct Args {
    raw_text: String,
}

/// Turns a free-text goal into a [`Goal`], after checking the text names
/// every part of one.
pub struct GoalAnalyzerTool {
    provider: Arc<dyn LlmProvider>,
    guardrails: Arc<GuardrailEngine>,
    format_check: Arc<GuardrailSpec>,
}

impl GoalAnalyzerTool {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        guardrails: Arc<GuardrailEngine>,
        format_check: Arc<GuardrailSpec>,
    ) -> Self {
        Self { provider, guardrails, format_check }
    }
}

#[async_trait]
impl Tool for GoalAnalyzerTool {
    fn name(&self) -> &str {
        "goal_analyzer"
    }

    fn description(&self) -> &str {
        "Analyze the user's raw goal description (e.g. \"lose 5 kg in 2 months\") and store it as a \
         structured goal with action, quantity, unit, duration and timeframe unit."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "raw_text": {"type": "string", "description": "The goal in the user's words"}
            },
            "required": ["raw_text"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, ctx: &mut ToolContext<'_>) -> Result<ToolResult, ToolError> {
        let start = Instant::now();
        let args: Args = parse_args(args)?;
        let cancel = ctx.abort_signal.clone();

        let verdict = self
            .guardrails
            .evaluate(std::slice::from_ref(&self.format_check), &args.raw_text, &cancel)
            .await
            .map_err(|e| match e {
                EngineError::Aborted => ToolError::Cancelled,
                other => ToolError::ExecutionFailed(other.to_string()),
            })?;
        if !verdict.passed {
            return Err(ToolError::ExecutionFailed(format!(
                "goal is missing details: {}",
                verdict.reasoning
            )));
        }

        let request = LlmContext::structured(INSTRUCTIONS, args.raw_text, goal_schema());
        let goal: Goal = run_structured_as(self.provider.as_ref(), &request, &cancel)
            .await
            .map_err(structured_failure)?;

        info!(agent = ctx.agent, action = ?goal.action, quantity = goal.quantity, "goal recorded");
        ctx.session.goal = Some(goal.clone());

        let mut result = ToolResult::json(&json!({
            "goal": goal,
            "message": "Goal recorded",
        }));
        result.duration = start.elapsed();
        Ok(result)
    }
}
