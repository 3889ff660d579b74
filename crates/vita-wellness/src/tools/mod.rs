pub mod context_data;
pub mod escalation;
pub mod goal;
pub mod meal;
pub mod medical;
pub mod progress;
pub mod scheduler;
pub mod workout;

use std::path::PathBuf;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use vita_core::provider::LlmProvider;
use vita_core::tools::ToolError;
use vita_engine::agents::RegistryError;
use vita_engine::guardrails::GuardrailEngine;
use vita_engine::registry::ToolRegistry;
use vita_engine::structured::StructuredError;
use vita_settings::VitaSettings;

use crate::guardrails::WellnessGuardrails;

/// Everything the wellness tools need from the outside.
pub struct ToolDeps {
    pub provider: Arc<dyn LlmProvider>,
    pub guardrails: Arc<GuardrailEngine>,
    pub specs: WellnessGuardrails,
    pub calendar_dir: PathBuf,
    pub default_calories: u32,
}

impl ToolDeps {
    pub fn from_settings(
        provider: Arc<dyn LlmProvider>,
        specs: WellnessGuardrails,
        settings: &VitaSettings,
    ) -> Self {
        let guardrails = GuardrailEngine::new(
            Arc::clone(&provider),
            settings.runtime.guardrail_mode,
            settings.runtime.guardrail_attempts,
        );
        Self {
            provider,
            guardrails: Arc::new(guardrails),
            specs,
            calendar_dir: PathBuf::from(&settings.wellness.calendar_dir),
            default_calories: settings.wellness.default_calories,
        }
    }
}

/// Create a ToolRegistry with every wellness tool.
pub fn create_wellness_registry(deps: &ToolDeps) -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();

    // Goals and plans
    registry.register(Arc::new(goal::GoalAnalyzerTool::new(
        Arc::clone(&deps.provider),
        Arc::clone(&deps.guardrails),
        Arc::clone(&deps.specs.goal_input),
    )))?;
    registry.register(Arc::new(meal::MealPlannerTool::new(deps.default_calories)))?;
    registry.register(Arc::new(medical::MedicalMealPlannerTool::new(Arc::clone(&deps.provider))))?;
    registry.register(Arc::new(workout::WorkoutRecommenderTool::new(Arc::clone(&deps.provider))))?;

    // Tracking
    registry.register(Arc::new(progress::ProgressTrackerTool))?;
    registry.register(Arc::new(scheduler::CheckinSchedulerTool::new(deps.calendar_dir.clone())))?;

    // Session data
    registry.register(Arc::new(context_data::ReadContextDataTool))?;
    registry.register(Arc::new(context_data::AddInjuryNoteTool))?;
    registry.register(Arc::new(context_data::CurrentTimeTool))?;

    // Humans
    registry.register(Arc::new(escalation::EscalateToCoachTool))?;

    Ok(registry)
}

/// Decode validated arguments into the tool's parameter struct.
pub(crate) fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// Compact JSON for prompt text; `None` renders as "not provided".
pub(crate) fn describe<T: serde::Serialize>(value: &Option<T>) -> String {
    match value {
        Some(v) => serde_json::to_string(v).unwrap_or_default(),
        None => "not provided".into(),
    }
}

pub(crate) fn structured_failure(e: StructuredError) -> ToolError {
    match e {
        StructuredError::Cancelled => ToolError::Cancelled,
        other => ToolError::ExecutionFailed(other.to_string()),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use tokio_util::sync::CancellationToken;
    use vita_core::ids::SessionId;
    use vita_core::session::SessionContext;
    use vita_core::tools::{Tool, ToolContext, ToolError, ToolResult};

    /// Run a tool directly against `session`.
    pub async fn run(
        tool: &dyn Tool,
        session: &mut SessionContext,
        args: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        let session_id = SessionId::new();
        let mut ctx = ToolContext {
            session_id: &session_id,
            agent: "Health Wellness Planner Agent",
            session,
            abort_signal: CancellationToken::new(),
        };
        tool.execute(args, &mut ctx).await
    }

    pub fn output(result: &ToolResult) -> serde_json::Value {
        serde_json::from_str(&result.content).unwrap()
    }
}
