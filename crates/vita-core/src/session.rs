//! Per-user state carried through a conversation.
//!
//! A [`SessionContext`] belongs to exactly one session. Tools mutate the plan
//! fields; the handoff router appends to `handoff_log`. Identity (`name`, `uid`)
//! is fixed at construction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalAction {
    Lose,
    Gain,
    Maintain,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GoalUnit {
    #[serde(rename = "kg")]
    Kg,
    #[serde(rename = "lbs")]
    Lbs,
    #[serde(rename = "%")]
    Percent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeframeUnit {
    Days,
    Weeks,
    Months,
}

/// A structured fitness goal, e.g. "lose 5 kg in 2 months".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub action: GoalAction,
    pub quantity: f64,
    pub unit: GoalUnit,
    pub duration: u32,
    pub timeframe_unit: TimeframeUnit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    Snacks,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Meal {
    pub name: String,
    pub calories: f64,
    #[serde(rename = "type")]
    pub meal_type: MealType,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MealDay {
    pub day: u32,
    pub meals: Vec<Meal>,
}

impl MealDay {
    pub fn total_calories(&self) -> f64 {
        self.meals.iter().map(|m| m.calories).sum()
    }
}

/// Exercises keyed by day name. Exercise entries are free-form objects
/// (`{"exercise": ..., "sets": ..., "reps": ...}`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkoutPlan {
    pub days: BTreeMap<String, Vec<serde_json::Value>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Diet {
    Vegetarian,
    Vegan,
    Pescatarian,
    Keto,
    Omnivore,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DietPreferences {
    pub diet: Diet,
    pub calories_per_day: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InjuryNote {
    pub injury_description: String,
    pub severity_level: String,
    pub affected_body_parts: Vec<String>,
    pub restrictions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A dated progress check-in. `date` is `YYYY-MM-DD`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub workouts_completed: Option<u32>,
    #[serde(default)]
    pub meals_followed: Option<u32>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(default)]
    pub sleep_hours: Option<f64>,
    #[serde(default)]
    pub water_intake: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    name: String,
    uid: String,
    pub goal: Option<Goal>,
    pub diet_preferences: Option<DietPreferences>,
    pub workout_plan: Option<WorkoutPlan>,
    pub meal_plan: Option<Vec<MealDay>>,
    pub injury_notes: Vec<InjuryNote>,
    pub handoff_log: Vec<String>,
    pub progress_log: Vec<ProgressUpdate>,
}

impl SessionContext {
    pub fn new(name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: uid.into(),
            goal: None,
            diet_preferences: None,
            workout_plan: None,
            meal_plan: None,
            injury_notes: Vec::new(),
            handoff_log: Vec::new(),
            progress_log: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Record an agent transition as `"<from> → <to>"`.
    pub fn log_handoff(&mut self, from: &str, to: &str) {
        self.handoff_log.push(format!("{from} → {to}"));
    }
}
