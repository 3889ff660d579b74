use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use vita_core::context::{LlmContext, OutputSchema};
use vita_core::provider::LlmProvider;
use vita_core::session::{SessionContext, WorkoutPlan};
use vita_core::tools::{Tool, ToolContext, ToolError, ToolResult};
use vita_engine::structured::run_structured_as;

use super::{describe, parse_args, structured_failure};

const INSTRUCTIONS: &str = "You are a fitness expert specializing in personalized workout plans. Use the \
    user's fitness goal, diet preferences, injury notes and experience level to build a safe, effective \
    weekly plan. Answer with a JSON object whose \"days\" field maps day names (Monday through Sunday) \
    to lists of exercise objects with fields such as exercise, sets, reps, duration and intensity. \
    Example: {\"days\": {\"Monday\": [{\"exercise\": \"Running\", \"duration\": \"30 minutes\", \
    \"intensity\": \"easy\"}]}}";

fn plan_schema() -> OutputSchema {
    OutputSchema {
        name: "WorkoutPlan".into(),
        schema: json!({
            "type": "object",
            "properties": {
                "days": {
                    "type": "object",
                    "additionalProperties": {"type": "array", "items": {"type": "object"}}
                }
            },
            "required": ["days"]
        }),
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Experience {
    Beginner,
    Intermediate,
    Advance,
}

impl Experience {
    fn as_str(self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advance => "advance",
        }
    }
}

#[derive(Debug, Deserialize)]
struct Args {
    experience: Experience,
}

fn plan_request(session: &SessionContext, experience: Experience) -> String {
    let injuries = if session.injury_notes.is_empty() {
        "none recorded".to_string()
    } else {
        serde_json::to_string(&session.injury_notes).unwrap_or_default()
    };
    format!(
        "Create a personalized weekly workout plan for the following user:\n\
         Name: {}\n\
         Experience level: {}\n\
         Goal: {}\n\
         Diet preferences: {}\n\
         Injury notes: {injuries}\n\
         List exercises per day of the week with sets and reps. Keep the plan safe and aligned \
         with the user's goals and restrictions.",
        session.name(),
        experience.as_str(),
        describe(&session.goal),
        describe(&session.diet_preferences),
    )
}

pub struct WorkoutRecommenderTool {
    provider: Arc<dyn LlmProvider>,
}

impl WorkoutRecommenderTool {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Tool for WorkoutRecommenderTool {
    fn name(&self) -> &str {
        "workout_recommender"
    }

    fn description(&self) -> &str {
        "Generate a personalized weekly workout plan from the user's experience level, goal, diet \
         preferences and injury notes, and store it in the session."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "experience": {"type": "string", "enum": ["beginner", "intermediate", "advance"]}
            },
            "required": ["experience"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, ctx: &mut ToolContext<'_>) -> Result<ToolResult, ToolError> {
        let start = Instant::now();
        let args: Args = parse_args(args)?;

        let prompt = plan_request(&*ctx.session, args.experience);
        let request = LlmContext::structured(INSTRUCTIONS, prompt, plan_schema());
        let plan: WorkoutPlan = run_structured_as(self.provider.as_ref(), &request, &ctx.abort_signal)
            .await
            .map_err(structured_failure)?;
        if plan.days.is_empty() {
            return Err(ToolError::ExecutionFailed("workout plan has no days".into()));
        }

        info!(days = plan.days.len(), experience = args.experience.as_str(), "workout plan stored");
        ctx.session.workout_plan = Some(plan.clone());

        let body = serde_json::to_value(&plan).map_err(|e| ToolError::EffectApplied(e.to_string()))?;
        let mut result = ToolResult::json(&body);
        result.duration = start.elapsed();
        Ok(result)
    }
}
