//! The four wellness agents and how they route to each other.

use vita_core::session::SessionContext;
use vita_engine::agents::{AgentDefinition, Instructions};

use crate::guardrails::WellnessGuardrails;

pub const PLANNER: &str = "Health Wellness Planner Agent";
pub const INJURY_SUPPORT: &str = "InjurySupportAgent";
pub const NUTRITION_EXPERT: &str = "NutritionExpertAgent";
pub const ESCALATION: &str = "Escalation Agent";

const HANDOFF_PREAMBLE: &str = "# System context\n\
    You are part of a multi-agent system. Agents pass a conversation to one another by calling a \
    transfer function named transfer_to_<agent_name>. Transfers happen in the background; do not \
    mention or draw attention to them in your conversation with the user.\n\n";

const EFFICIENCY: &str = "Efficiency guidelines:\n\
    - Never ask several questions in sequence; gather what you need at once.\n\
    - Do not ask for confirmation or repeat information back; proceed with the task.\n\
    - Do not explain background processes or tool usage to the user.\n";

fn with_preamble(body: &str) -> String {
    format!("{HANDOFF_PREAMBLE}{body}")
}

/// Planner instructions rebuilt from the session before every model call.
pub fn planner_instructions(session: &SessionContext) -> String {
    let mut summary = format!("User: {}\n", session.name());
    if let Some(goal) = &session.goal {
        let goal = serde_json::to_value(goal).unwrap_or_default();
        summary.push_str(&format!(
            "Current Goal: {} {} {} in {} {}\n",
            goal["action"].as_str().unwrap_or_default(),
            goal["quantity"],
            goal["unit"].as_str().unwrap_or_default(),
            goal["duration"],
            goal["timeframe_unit"].as_str().unwrap_or_default(),
        ));
    }
    if let Some(prefs) = &session.diet_preferences {
        let diet = serde_json::to_value(prefs.diet).unwrap_or_default();
        summary.push_str(&format!(
            "Dietary Preferences: {}, {} calories/day\n",
            diet.as_str().unwrap_or_default(),
            prefs.calories_per_day
        ));
    }
    if !session.injury_notes.is_empty() {
        let recent: Vec<&str> = session
            .injury_notes
            .iter()
            .rev()
            .take(3)
            .map(|n| n.injury_description.as_str())
            .collect();
        summary.push_str(&format!("Injury Information: {}\n", recent.join("; ")));
    }
    if let Some(plan) = &session.meal_plan {
        summary.push_str(&format!("Meal Plan: {} days available\n", plan.len()));
    }
    if session.workout_plan.is_some() {
        summary.push_str("Workout Plan: Available\n");
    }
    if !session.progress_log.is_empty() {
        summary.push_str(&format!("Progress Tracking: {} entries logged\n", session.progress_log.len()));
    }

    let mut focus = Vec::new();
    if session.goal.is_none() {
        focus.push("Help the user set a clear, achievable fitness goal.");
    } else {
        if session.workout_plan.is_none() {
            focus.push("Recommend a workout plan that aligns with their current goal.");
        }
        if session.meal_plan.is_none() {
            focus.push("Suggest a meal plan that supports their fitness goal.");
        }
    }
    if !session.injury_notes.is_empty() {
        focus.push("Consider their injury limitations when making recommendations.");
    }
    if !session.progress_log.is_empty() {
        focus.push("Reference their progress history for continuity and motivation.");
    }
    let focus: String = focus.iter().map(|f| format!("- {f}\n")).collect();

    with_preamble(&format!(
        "You are a comprehensive Health & Wellness Planner that helps users reach their fitness and \
         health goals.\n\n\
         Current user context:\n{summary}\n\
         Responsibilities:\n\
         1. Understand and structure the user's fitness goals.\n\
         2. Generate meal plans from dietary preferences and restrictions.\n\
         3. Create workout recommendations tailored to experience and goals.\n\
         4. Schedule progress check-ins and track progress over time.\n\
         5. Hand off to a specialist when specific expertise is needed.\n\n\
         Current focus:\n{focus}\n\
         Available tools:\n\
         - goal_analyzer: parse and structure fitness goals from natural language\n\
         - meal_planner: generate personalized meal plans\n\
         - workout_recommender: create tailored workout schedules\n\
         - progress_tracker: log and track progress updates\n\
         - checkin_scheduler_local: schedule local calendar reminders\n\
         - read_context_data: read the user's session information\n\
         - add_injury_note: record injury information\n\
         - get_current_time: current date and time for scheduling\n\n\
         Handoff triggers:\n\
         - The user wants to speak with a human coach: {ESCALATION}\n\
         - The user mentions an injury or physical limitation: {INJURY_SUPPORT}\n\
         - The user has complex dietary needs such as diabetes or allergies: {NUTRITION_EXPERT}\n\n\
         Always use get_current_time for the current date; never ask the user for it. Omit \
         start_date when scheduling to start today. Address the user as {} when appropriate and \
         build on their existing goals, plans and progress. Be supportive and encouraging, and put \
         the user's safety first.",
        session.name()
    ))
}

fn planner(specs: &WellnessGuardrails) -> AgentDefinition {
    AgentDefinition::new(PLANNER, Instructions::dynamic(planner_instructions))
        .with_tools([
            "goal_analyzer",
            "meal_planner",
            "workout_recommender",
            "progress_tracker",
            "checkin_scheduler_local",
            "read_context_data",
            "add_injury_note",
            "escalate_to_human_coach",
            "get_current_time",
        ])
        .with_input_guardrail(specs.health_input.clone())
        .with_handoffs([ESCALATION, INJURY_SUPPORT, NUTRITION_EXPERT])
}

fn injury_support(specs: &WellnessGuardrails) -> AgentDefinition {
    let body = "You are an injury support agent that helps users adapt their fitness routines around \
        injuries and physical limitations.\n\n\
        When a user mentions an injury or limitation:\n\
        - Record it with add_injury_note.\n\
        - Read their current goals and plans with read_context_data.\n\
        - Recommend specific safe exercises and list the ones to avoid.\n\
        - Suggest alternative movements that work around the limitation.\n\
        - Use workout_recommender to rebuild the plan when needed.\n\n\
        Always prioritize safety and encourage users to consult a healthcare professional for \
        serious injuries. Be empathetic while keeping them active safely.";
    AgentDefinition::new(INJURY_SUPPORT, with_preamble(body))
        .with_tools(["add_injury_note", "read_context_data", "workout_recommender", "get_current_time"])
        .with_input_guardrail(specs.injury_input.clone())
        .with_output_guardrail(specs.injury_output.clone())
        .with_handoff_description("Handles injury-related fitness adaptations and safe exercise recommendations")
}

fn nutrition_expert(specs: &WellnessGuardrails) -> AgentDefinition {
    let body = format!(
        "You are a nutrition expert specializing in dietary guidance for medical conditions \
         (diabetes, celiac disease, hypertension, food allergies and intolerances).\n\n\
         {EFFICIENCY}\
         - Check the session context before asking for missing details, and ask at most once.\n\
         - Defaults when the user does not say: 2000 calories per day, 7 days, moderate severity.\n\n\
         Use medical_meal_planner for medical conditions and meal_planner for general nutrition. Log \
         adherence with progress_tracker. Always include safety notes and medical disclaimers, say \
         which foods to avoid and include, and recommend consulting a healthcare provider."
    );
    AgentDefinition::new(NUTRITION_EXPERT, with_preamble(&body))
        .with_tools(["meal_planner", "medical_meal_planner", "progress_tracker", "get_current_time"])
        .with_input_guardrail(specs.nutrition_input.clone())
        .with_output_guardrail(specs.medical_meal_plan_output.clone())
        .with_handoff_description(
            "Provides specialized nutrition guidance for medical conditions and dietary restrictions",
        )
}

fn escalation(specs: &WellnessGuardrails) -> AgentDefinition {
    let body = format!(
        "You are an escalation agent for users who want to speak with a human coach or support \
         representative.\n\n\
         {EFFICIENCY}\
         - Default to general coaching with normal urgency when the user does not say.\n\n\
         Call escalate_to_human_coach right away, then give the user the contact details and the \
         estimated wait time. Stay professional and empathetic during the transition."
    );
    AgentDefinition::new(ESCALATION, with_preamble(&body))
        .with_tools(["escalate_to_human_coach"])
        .with_input_guardrail(specs.escalation_input.clone())
        .with_handoff_description("Handles requests to speak with human coaches or support representatives")
}

/// Every wellness agent; [`PLANNER`] is the entry point.
pub fn wellness_agents(specs: &WellnessGuardrails) -> Vec<AgentDefinition> {
    vec![planner(specs), injury_support(specs), nutrition_expert(specs), escalation(specs)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guardrails::{HEALTH_INPUT, INJURY_OUTPUT, MEDICAL_MEAL_PLAN_OUTPUT};
    use vita_core::session::{Goal, GoalAction, GoalUnit, TimeframeUnit};

    #[test]
    fn planner_routes_to_every_specialist() {
        let agents = wellness_agents(&WellnessGuardrails::new());
        let planner = &agents[0];
        assert_eq!(planner.name, PLANNER);
        assert_eq!(planner.input_guardrails[0].name, HEALTH_INPUT);
        for target in [ESCALATION, INJURY_SUPPORT, NUTRITION_EXPERT] {
            assert!(planner.can_hand_off_to(target));
        }
        assert!(!planner.tools.iter().any(|t| t == "medical_meal_planner"));
        assert!(agents[1..].iter().all(|a| a.handoff_targets.is_empty()));
    }

    #[test]
    fn specialists_carry_output_checks() {
        let agents = wellness_agents(&WellnessGuardrails::new());
        assert_eq!(agents[1].output_guardrails[0].name, INJURY_OUTPUT);
        assert_eq!(agents[2].output_guardrails[0].name, MEDICAL_MEAL_PLAN_OUTPUT);
        assert!(agents[3].output_guardrails.is_empty());
    }

    #[test]
    fn planner_instructions_follow_session_state() {
        let mut session = SessionContext::new("Ada", "u1");
        let fresh = planner_instructions(&session);
        assert!(fresh.starts_with("# System context"));
        assert!(fresh.contains("User: Ada"));
        assert!(fresh.contains("set a clear, achievable fitness goal"));

        session.goal = Some(Goal {
            action: GoalAction::Lose,
            quantity: 5.0,
            unit: GoalUnit::Kg,
            duration: 2,
            timeframe_unit: TimeframeUnit::Months,
        });
        let with_goal = planner_instructions(&session);
        assert!(with_goal.contains("Current Goal: lose 5.0 kg in 2 months"));
        assert!(with_goal.contains("Recommend a workout plan"));
        assert!(!with_goal.contains("set a clear, achievable fitness goal"));
    }
}
