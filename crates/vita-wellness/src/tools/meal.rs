use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use vita_core::session::{Diet, DietPreferences, Meal, MealDay, MealType};
use vita_core::tools::{Tool, ToolContext, ToolError, ToolResult};

use super::parse_args;

pub const PLAN_DAYS: u32 = 7;

/// Template meals per diet: (name, type, calories). Each day sums to 1800 kcal.
fn template(diet: Diet) -> [(&'static str, MealType, f64); 4] {
    use MealType::*;
    match diet {
        Diet::Vegetarian => [
            ("Oatmeal with Berries", Breakfast, 350.0),
            ("Vegetable Stir Fry", Lunch, 500.0),
            ("Chickpea Curry", Dinner, 600.0),
            ("Greek Yogurt & Nuts", Snacks, 350.0),
        ],
        Diet::Vegan => [
            ("Tofu Scramble", Breakfast, 350.0),
            ("Quinoa Salad", Lunch, 500.0),
            ("Lentil Stew", Dinner, 600.0),
            ("Fruit & Seeds", Snacks, 350.0),
        ],
        Diet::Pescatarian => [
            ("Avocado Toast", Breakfast, 350.0),
            ("Tuna Salad", Lunch, 500.0),
            ("Grilled Salmon", Dinner, 600.0),
            ("Hummus & Veggies", Snacks, 350.0),
        ],
        Diet::Keto => [
            ("Egg Muffins", Breakfast, 350.0),
            ("Chicken Caesar Salad", Lunch, 500.0),
            ("Beef Stir Fry", Dinner, 600.0),
            ("Cheese & Olives", Snacks, 350.0),
        ],
        Diet::Omnivore => [
            ("Scrambled Eggs", Breakfast, 350.0),
            ("Turkey Sandwich", Lunch, 500.0),
            ("Grilled Chicken", Dinner, 600.0),
            ("Yogurt & Fruit", Snacks, 350.0),
        ],
    }
}

/// Build a week of identical days from the diet template, each meal scaled
/// so the day totals roughly `calories_per_day` (whole calories, rounded down).
pub fn build_meal_plan(prefs: &DietPreferences) -> Vec<MealDay> {
    let meals = template(prefs.diet);
    let base: f64 = meals.iter().map(|(_, _, kcal)| kcal).sum();
    let ratio = f64::from(prefs.calories_per_day) / base;
    let day: Vec<Meal> = meals
        .iter()
        .map(|(name, meal_type, kcal)| Meal {
            name: (*name).to_string(),
            calories: (kcal * ratio).floor(),
            meal_type: *meal_type,
        })
        .collect();
    (1..=PLAN_DAYS)
        .map(|day_number| MealDay { day: day_number, meals: day.clone() })
        .collect()
}

#[derive(Debug, Default, Deserialize)]
struct PartialPreferences {
    diet: Option<Diet>,
    calories_per_day: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct Args {
    preferences: Option<PartialPreferences>,
}

/// Weekly meal plan from stored or supplied diet preferences.
pub struct MealPlannerTool {
    default_calories: u32,
}

impl MealPlannerTool {
    pub fn new(default_calories: u32) -> Self {
        Self { default_calories }
    }
}

#[async_trait]
impl Tool for MealPlannerTool {
    fn name(&self) -> &str {
        "meal_planner"
    }

    fn description(&self) -> &str {
        "Generate a 7-day meal plan from the user's dietary preferences and daily calorie target. \
         Preferences default to the ones stored in the session; missing fields default to an \
         omnivore diet and the standard calorie target. Stores the plan and preferences."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "preferences": {
                    "type": "object",
                    "properties": {
                        "diet": {
                            "type": "string",
                            "enum": ["vegetarian", "vegan", "pescatarian", "keto", "omnivore"]
                        },
                        "calories_per_day": {"type": "integer", "minimum": 1}
                    },
                    "additionalProperties": false
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, ctx: &mut ToolContext<'_>) -> Result<ToolResult, ToolError> {
        let start = Instant::now();
        let args: Args = parse_args(args)?;

        let prefs = match (args.preferences, &ctx.session.diet_preferences) {
            (Some(p), _) => DietPreferences {
                diet: p.diet.unwrap_or(Diet::Omnivore),
                calories_per_day: p.calories_per_day.unwrap_or(self.default_calories),
            },
            (None, Some(stored)) => stored.clone(),
            (None, None) => {
                return Err(ToolError::InvalidArguments(
                    "preferences must be provided either as a parameter or in the session".into(),
                ))
            }
        };

        let plan = build_meal_plan(&prefs);
        ctx.session.meal_plan = Some(plan.clone());
        ctx.session.diet_preferences = Some(prefs);

        let body = serde_json::to_value(&plan).map_err(|e| ToolError::EffectApplied(e.to_string()))?;
        let mut result = ToolResult::json(&body);
        result.duration = start.elapsed();
        Ok(result)
    }
}
