//! Classifier guardrails for the wellness agents.
//!
//! Each constructor returns a fresh spec; [`WellnessGuardrails`] builds the
//! set once so agents share the same `Arc`s.

use std::sync::Arc;

use serde_json::{json, Value};

use vita_core::context::OutputSchema;
use vita_engine::guardrails::{GuardrailSpec, TripwirePolicy};

pub const HEALTH_INPUT: &str = "health_input_guardrail";
pub const GOAL_INPUT: &str = "goal_input_guardrail";
pub const ESCALATION_INPUT: &str = "escalation_input_guardrail";
pub const INJURY_INPUT: &str = "injury_input_guardrail";
pub const INJURY_OUTPUT: &str = "injury_output_guardrail";
pub const NUTRITION_INPUT: &str = "nutrition_input_guardrail";
pub const MEDICAL_MEAL_PLAN_OUTPUT: &str = "medical_meal_plan_output_guardrail";

/// Confidence above which an off-topic classification rejects the prompt.
pub const HEALTH_REJECT_CONFIDENCE: f64 = 0.8;

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

fn schema(name: &str, properties: Value, required: &[&str]) -> OutputSchema {
    OutputSchema {
        name: name.to_string(),
        schema: object_schema(properties, required),
    }
}

fn require_true(field: &str) -> TripwirePolicy {
    TripwirePolicy::RequireTrue { field: field.to_string() }
}

pub fn health_input() -> GuardrailSpec {
    GuardrailSpec::new(
        HEALTH_INPUT,
        "Determine if the user's input is related to health, fitness, nutrition, or wellness topics. \
         Be INCLUSIVE and classify health-related queries into these categories: \
         - fitness: exercise, workouts, training, physical activity, gym, running, sports \
         - nutrition: diet, food, meals, eating habits, dietary restrictions, meal planning, calories \
         - wellness: mental health, stress, sleep, lifestyle, general wellbeing, mindfulness, meditation \
         - medical: specific medical conditions, symptoms, medications, health appointments, checkups \
         - general_health: general health questions, health goals, preventive care, scheduling appointments, \
           progress tracking, health monitoring, check-ins, reminders, health planning \
         - not_health_related: topics completely unrelated to health, fitness, or wellness \
         IMPORTANT: scheduling check-ins or reminders, progress tracking, health goal setting and \
         wellness coaching requests are ALWAYS health-related and should be classified as general_health. \
         Provide a confidence score (0.0 to 1.0) and clear reasoning for your classification. \
         When in doubt, classify as health-related rather than not_health_related.",
        schema(
            "HealthQueryValidation",
            json!({
                "is_health_related": {"type": "boolean"},
                "query_category": {
                    "type": "string",
                    "enum": ["fitness", "nutrition", "wellness", "medical", "general_health", "not_health_related"]
                },
                "confidence_score": {"type": "number", "minimum": 0, "maximum": 1},
                "reasoning": {"type": "string"}
            }),
            &["is_health_related", "query_category", "confidence_score", "reasoning"],
        ),
        TripwirePolicy::RejectCategory {
            flag: "is_health_related".into(),
            category_field: "query_category".into(),
            category: "not_health_related".into(),
            confidence_field: "confidence_score".into(),
            threshold: HEALTH_REJECT_CONFIDENCE,
        },
    )
}

pub fn goal_input() -> GuardrailSpec {
    GuardrailSpec::new(
        GOAL_INPUT,
        "Determine if the user's input is related to analyzing or setting a fitness or health goal. \
         Check if the input provides all necessary details to define a structured goal: \
         the action (lose, gain, maintain), quantity (numeric value), unit (kg, lbs, %), \
         duration (numeric value), and timeframe unit (days, weeks, months). \
         If any required information is missing, ambiguous, or unrelated to a goal, explain your reasoning clearly.",
        schema(
            "GoalOutput",
            json!({
                "is_correct_format": {"type": "boolean"},
                "reasoning": {"type": "string"}
            }),
            &["is_correct_format", "reasoning"],
        ),
        require_true("is_correct_format"),
    )
}

pub fn escalation_input() -> GuardrailSpec {
    GuardrailSpec::new(
        ESCALATION_INPUT,
        "Determine if the user's input is a request to speak with a human coach, trainer, or support \
         representative. Look for phrases such as 'speak to a human', 'talk to a coach', 'contact support', \
         'real trainer', 'live coach', 'human assistance', 'speak to someone', 'get help from a person', \
         'emergency' or 'urgent help needed'. If the input is not an escalation request, explain why. \
         If it is valid, categorize the type of escalation needed.",
        schema(
            "EscalationRequestValidation",
            json!({
                "is_escalation_request": {"type": "boolean"},
                "reasoning": {"type": "string"},
                "request_type": {"type": ["string", "null"], "enum": ["coach", "support", "emergency", null]}
            }),
            &["is_escalation_request", "reasoning"],
        ),
        require_true("is_escalation_request"),
    )
}

pub fn injury_input() -> GuardrailSpec {
    GuardrailSpec::new(
        INJURY_INPUT,
        "Validate if the user's input contains injury-related information that requires special workout \
         adaptations. Check if the input includes a clear description of the injury or physical limitation, \
         a severity level (mild, moderate, severe), affected body parts or movement restrictions, and any \
         medical conditions that impact exercise ability. If the input is not injury-related or lacks \
         sufficient detail, explain why it doesn't qualify.",
        schema(
            "InjuryInput",
            json!({
                "is_valid_injury_input": {"type": "boolean"},
                "injury_type": {"type": "string"},
                "severity_level": {"type": "string", "enum": ["mild", "moderate", "severe"]},
                "reasoning": {"type": "string"}
            }),
            &["is_valid_injury_input", "injury_type", "severity_level", "reasoning"],
        ),
        require_true("is_valid_injury_input"),
    )
}

/// Reviews the injury agent's answer for structure. Never rejects.
pub fn injury_output() -> GuardrailSpec {
    let list = json!({"type": "array", "items": {"type": "string"}});
    GuardrailSpec::new(
        INJURY_OUTPUT,
        "Validate that the injury support agent's response includes the required structured output: \
         a list of allowed exercises that are safe for the user's injury, a list of prohibited exercises \
         that should be avoided, a list of safe alternative exercises, clear recommendations for adapting \
         the workout routine, and the severity level of the injury. If any required fields are missing or \
         unclear, provide a corrected version.",
        schema(
            "InjuryOutput",
            json!({
                "allowed_exercises": list,
                "prohibited_exercises": list,
                "safe_alternatives": list,
                "recommendations": {"type": "string"},
                "severity_level": {"type": "string"}
            }),
            &["allowed_exercises", "prohibited_exercises", "safe_alternatives", "recommendations", "severity_level"],
        ),
        TripwirePolicy::Observe,
    )
}

pub fn nutrition_input() -> GuardrailSpec {
    GuardrailSpec::new(
        NUTRITION_INPUT,
        "Determine if the user's input is related to nutrition, dietary needs, or medical conditions that \
         require specialized dietary guidance. Look for medical conditions ('diabetes', 'celiac', \
         'gluten intolerance', 'hypertension', 'allergies'), dietary restrictions ('can't eat', \
         'allergic to', 'sensitive to', 'intolerant to'), nutrition concerns ('blood sugar', \
         'blood pressure', 'digestive issues', 'food allergies') and special diets ('medical diet', \
         'therapeutic diet', 'prescribed diet'). If the input is not a nutrition request, explain why. \
         If it is valid, identify the medical condition and severity level.",
        schema(
            "NutritionInput",
            json!({
                "is_nutrition_request": {"type": "boolean"},
                "reasoning": {"type": "string"},
                "medical_condition": {"type": ["string", "null"]},
                "severity": {"type": ["string", "null"]}
            }),
            &["is_nutrition_request", "reasoning"],
        ),
        require_true("is_nutrition_request"),
    )
}

pub fn medical_meal_plan_output() -> GuardrailSpec {
    GuardrailSpec::new(
        MEDICAL_MEAL_PLAN_OUTPUT,
        "Validate that the generated medical meal plan is appropriate and safe for the user's condition. \
         Check that the plan addresses the specific medical condition, that safety notes and disclaimers \
         are included, that the plan follows medical dietary guidelines, that all meals are appropriate \
         for the condition and that it includes proper nutritional guidance. If the plan is not valid or \
         safe, explain the issues.",
        schema(
            "MedicalMealPlanOutput",
            json!({
                "is_valid_plan": {"type": "boolean"},
                "reasoning": {"type": "string"},
                "condition_covered": {"type": "boolean"},
                "safety_notes_present": {"type": "boolean"}
            }),
            &["is_valid_plan", "reasoning", "condition_covered", "safety_notes_present"],
        ),
        require_true("is_valid_plan"),
    )
}

/// The shared guardrail set.
#[derive(Clone, Debug)]
pub struct WellnessGuardrails {
    pub health_input: Arc<GuardrailSpec>,
    pub goal_input: Arc<GuardrailSpec>,
    pub escalation_input: Arc<GuardrailSpec>,
    pub injury_input: Arc<GuardrailSpec>,
    pub injury_output: Arc<GuardrailSpec>,
    pub nutrition_input: Arc<GuardrailSpec>,
    pub medical_meal_plan_output: Arc<GuardrailSpec>,
}

impl WellnessGuardrails {
    pub fn new() -> Self {
        Self {
            health_input: Arc::new(health_input()),
            goal_input: Arc::new(goal_input()),
            escalation_input: Arc::new(escalation_input()),
            injury_input: Arc::new(injury_input()),
            injury_output: Arc::new(injury_output()),
            nutrition_input: Arc::new(nutrition_input()),
            medical_meal_plan_output: Arc::new(medical_meal_plan_output()),
        }
    }
}

impl Default for WellnessGuardrails {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_check_rejects_only_confident_off_topic() {
        let spec = health_input();
        let verdict = |related: bool, category: &str, confidence: f64| {
            json!({
                "is_health_related": related,
                "query_category": category,
                "confidence_score": confidence,
                "reasoning": "r"
            })
        };
        assert!(!spec.decide(&verdict(false, "not_health_related", 0.95)).unwrap().passed);
        assert!(spec.decide(&verdict(false, "not_health_related", 0.8)).unwrap().passed);
        assert!(spec.decide(&verdict(false, "general_health", 0.99)).unwrap().passed);
        assert!(spec.decide(&verdict(true, "fitness", 0.99)).unwrap().passed);
    }

    #[test]
    fn injury_output_observes() {
        let verdict = json!({
            "allowed_exercises": [],
            "prohibited_exercises": ["running"],
            "safe_alternatives": [],
            "recommendations": "rest",
            "severity_level": "mild"
        });
        assert!(injury_output().decide(&verdict).unwrap().passed);
    }

    #[test]
    fn require_true_specs_name_their_field() {
        let cases = [
            (goal_input(), "is_correct_format"),
            (escalation_input(), "is_escalation_request"),
            (injury_input(), "is_valid_injury_input"),
            (nutrition_input(), "is_nutrition_request"),
            (medical_meal_plan_output(), "is_valid_plan"),
        ];
        for (spec, field) in cases {
            let rejected = spec.decide(&json!({ field: false, "reasoning": "no" })).unwrap();
            assert!(!rejected.passed, "{}", spec.name);
            assert_eq!(rejected.guardrail.as_deref(), Some(spec.name.as_str()));
            assert!(spec.decide(&json!({ field: true, "reasoning": "ok" })).unwrap().passed);
        }
    }

    #[test]
    fn schemas_list_reasoning_or_observe() {
        let set = WellnessGuardrails::new();
        for spec in [&set.health_input, &set.goal_input, &set.nutrition_input] {
            let required = spec.output.schema["required"].as_array().unwrap();
            assert!(required.iter().any(|f| f == "reasoning"), "{}", spec.name);
        }
    }
}
