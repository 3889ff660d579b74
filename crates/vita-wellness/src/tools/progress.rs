use std::time::Instant;

use async_trait::async_trait;
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use vita_core::session::{Goal, GoalAction, ProgressUpdate};
use vita_core::tools::{Tool, ToolContext, ToolError, ToolResult};

use super::parse_args;

/// Aggregates over every progress entry in a session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub total_updates: usize,
    /// Last recorded weight minus the first; needs at least two weigh-ins.
    pub weight_change: Option<f64>,
    pub workouts_completed_total: u32,
    pub meals_followed_total: u32,
    pub average_sleep: Option<f64>,
    /// Share of the goal quantity achieved, clamped to 0..=100.
    pub progress_percentage: Option<f64>,
}

pub fn calculate_progress_summary(logs: &[ProgressUpdate], goal: Option<&Goal>) -> ProgressSummary {
    if logs.is_empty() {
        return ProgressSummary::default();
    }

    let weights: Vec<f64> = logs.iter().filter_map(|l| l.weight).collect();
    let sleep: Vec<f64> = logs.iter().filter_map(|l| l.sleep_hours).collect();

    let weight_change = match weights.as_slice() {
        [first, .., last] => Some(last - first),
        _ => None,
    };
    let average_sleep = (!sleep.is_empty()).then(|| sleep.iter().sum::<f64>() / sleep.len() as f64);

    let progress_percentage = match (goal, weight_change) {
        (Some(goal), Some(change)) if change != 0.0 && goal.quantity > 0.0 => {
            let achieved = match goal.action {
                GoalAction::Lose => -change,
                GoalAction::Gain => change,
                GoalAction::Maintain => return summary(logs, weight_change, average_sleep, None),
            };
            Some((achieved / goal.quantity * 100.0).clamp(0.0, 100.0))
        }
        _ => None,
    };

    summary(logs, weight_change, average_sleep, progress_percentage)
}

fn summary(
    logs: &[ProgressUpdate],
    weight_change: Option<f64>,
    average_sleep: Option<f64>,
    progress_percentage: Option<f64>,
) -> ProgressSummary {
    ProgressSummary {
        total_updates: logs.len(),
        weight_change,
        workouts_completed_total: logs
            .iter()
            .filter_map(|l| l.workouts_completed)
            .fold(0, u32::saturating_add),
        meals_followed_total: logs.iter().filter_map(|l| l.meals_followed).fold(0, u32::saturating_add),
        average_sleep,
        progress_percentage,
    }
}

#[derive(Debug, Deserialize)]
struct Args {
    update_data: Option<ProgressUpdate>,
    raw_update: Option<String>,
}

/// Records a progress check-in and reports running totals.
pub struct ProgressTrackerTool;

#[async_trait]
impl Tool for ProgressTrackerTool {
    fn name(&self) -> &str {
        "progress_tracker"
    }

    fn description(&self) -> &str {
        "Record a progress update (weight, workouts completed, meals followed, mood, sleep, water \
         intake, notes) either as structured data or as a free-text note, and return the updated \
         progress summary."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "update_data": {
                    "type": "object",
                    "properties": {
                        "date": {"type": "string", "description": "YYYY-MM-DD; defaults to today"},
                        "weight": {"type": "number"},
                        "workouts_completed": {"type": "integer", "minimum": 0},
                        "meals_followed": {"type": "integer", "minimum": 0},
                        "notes": {"type": "string"},
                        "mood": {"type": "string"},
                        "sleep_hours": {"type": "number", "minimum": 0},
                        "water_intake": {"type": "number", "minimum": 0}
                    },
                    "additionalProperties": false
                },
                "raw_update": {"type": "string", "description": "Free-text progress note"}
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, ctx: &mut ToolContext<'_>) -> Result<ToolResult, ToolError> {
        let start = Instant::now();
        let args: Args = parse_args(args)?;

        let mut update = match (args.update_data, args.raw_update) {
            (Some(data), _) => data,
            (None, Some(note)) => ProgressUpdate { notes: Some(note), ..ProgressUpdate::default() },
            (None, None) => {
                return Err(ToolError::InvalidArguments(
                    "either update_data or raw_update must be provided".into(),
                ))
            }
        };
        if update.date.is_empty() {
            update.date = Local::now().format("%Y-%m-%d").to_string();
        }

        ctx.session.progress_log.push(update.clone());
        let summary = calculate_progress_summary(&ctx.session.progress_log, ctx.session.goal.as_ref());

        let body = json!({
            "progress_update": update,
            "progress_summary": summary,
            "message": format!("Progress update recorded for {}. Keep up the great work!", update.date),
            "total_updates": ctx.session.progress_log.len(),
        });
        let mut result = ToolResult::json(&body);
        result.duration = start.elapsed();
        Ok(result)
    }
}
