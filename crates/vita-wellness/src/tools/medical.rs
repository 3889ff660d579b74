use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use vita_core::context::{LlmContext, OutputSchema};
use vita_core::provider::LlmProvider;
use vita_core::session::MealDay;
use vita_core::tools::{Tool, ToolContext, ToolError, ToolResult};
use vita_engine::structured::run_structured_as;

use super::meal::PLAN_DAYS;
use super::{parse_args, structured_failure};

const INSTRUCTIONS: &str = "You are a medical meal plan specialist. Create personalized meal plans for \
    users with specific medical conditions, considering the condition, its severity, dietary \
    restrictions and nutritional requirements. Always prioritize safety and medical appropriateness. \
    Answer with a JSON object holding the condition and 7 days of condition-specific meals.";

pub const SAFETY_NOTES: [&str; 5] = [
    "This plan was generated by AI and is for general guidance only",
    "Always consult with your healthcare provider",
    "Monitor your condition and adjust as needed",
    "Keep track of any adverse reactions",
    "Follow your doctor's specific recommendations",
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MedicalMealPlan {
    pub days: Vec<MealDay>,
    pub condition: String,
}

fn plan_schema() -> OutputSchema {
    OutputSchema {
        name: "MedicalMealPlan".into(),
        schema: json!({
            "type": "object",
            "properties": {
                "condition": {"type": "string"},
                "days": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "day": {"type": "integer", "minimum": 1},
                            "meals": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "name": {"type": "string"},
                                        "calories": {"type": "number"},
                                        "type": {"type": "string", "enum": ["breakfast", "lunch", "dinner", "snacks"]}
                                    },
                                    "required": ["name", "calories", "type"]
                                }
                            }
                        },
                        "required": ["day", "meals"]
                    }
                }
            },
            "required": ["condition", "days"]
        }),
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MedicalMealPlanRequest {
    pub condition: String,
    pub severity: String,
    #[serde(default)]
    pub restrictions: Vec<String>,
    #[serde(default)]
    pub requirements: BTreeMap<String, Value>,
    pub calories_per_day: Option<u32>,
    pub additional_notes: Option<String>,
}

impl MedicalMealPlanRequest {
    fn prompt(&self) -> String {
        let restrictions = if self.restrictions.is_empty() {
            "None".to_string()
        } else {
            self.restrictions.join(", ")
        };
        let calories = self
            .calories_per_day
            .map(|c| c.to_string())
            .unwrap_or_else(|| "Default for condition".into());
        format!(
            "Create a medical meal plan for a user with the following requirements:\n\
             Medical Condition: {}\n\
             Severity: {}\n\
             Dietary Restrictions: {restrictions}\n\
             Nutritional Requirements: {}\n\
             Target Calories: {calories}\n\
             Additional Notes: {}\n\
             Create a {PLAN_DAYS}-day meal plan that is safe for this condition, follows medical \
             dietary guidelines and respects the restrictions.",
            self.condition,
            self.severity,
            serde_json::to_string(&self.requirements).unwrap_or_default(),
            self.additional_notes.as_deref().unwrap_or("None"),
        )
    }
}

#[derive(Debug, Deserialize)]
struct Args {
    request: MedicalMealPlanRequest,
}

/// Condition-specific meal planning through a nested model call.
pub struct MedicalMealPlannerTool {
    provider: Arc<dyn LlmProvider>,
}

impl MedicalMealPlannerTool {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Tool for MedicalMealPlannerTool {
    fn name(&self) -> &str {
        "medical_meal_planner"
    }

    fn description(&self) -> &str {
        "Create a 7-day meal plan for a medical condition (diabetes, celiac disease, hypertension, \
         food allergies, ...) from the condition, severity, restrictions and nutritional requirements."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "request": {
                    "type": "object",
                    "properties": {
                        "condition": {"type": "string"},
                        "severity": {"type": "string"},
                        "restrictions": {"type": "array", "items": {"type": "string"}},
                        "requirements": {"type": "object"},
                        "calories_per_day": {"type": "integer", "minimum": 1},
                        "additional_notes": {"type": "string"}
                    },
                    "required": ["condition", "severity"]
                }
            },
            "required": ["request"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, ctx: &mut ToolContext<'_>) -> Result<ToolResult, ToolError> {
        let start = Instant::now();
        let Args { request } = parse_args(args)?;

        let llm = LlmContext::structured(INSTRUCTIONS, request.prompt(), plan_schema());
        let plan: MedicalMealPlan = run_structured_as(self.provider.as_ref(), &llm, &ctx.abort_signal)
            .await
            .map_err(structured_failure)?;
        if plan.days.is_empty() {
            return Err(ToolError::ExecutionFailed("medical meal plan has no days".into()));
        }

        info!(condition = %request.condition, days = plan.days.len(), "medical meal plan stored");
        ctx.session.meal_plan = Some(plan.days.clone());

        let mut result = ToolResult::json(&json!({
            "medical_meal_plan": &plan,
            "condition": &request.condition,
            "severity": &request.severity,
            "message": format!(
                "AI-generated medical meal plan created for {}. Please consult with your healthcare \
                 provider before starting this plan.",
                request.condition
            ),
            "safety_notes": SAFETY_NOTES,
            "request_details": &request,
        }));
        result.duration = start.elapsed();
        Ok(result)
    }
}
