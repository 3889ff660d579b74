//! Tools that read or annotate the session context directly.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use vita_core::session::{InjuryNote, SessionContext};
use vita_core::tools::{Tool, ToolContext, ToolError, ToolResult};

use super::parse_args;

const DATA_TYPES: [&str; 9] = [
    "name",
    "goal",
    "workout_plan",
    "meal_plan",
    "diet_preferences",
    "injury_notes",
    "progress_logs",
    "handoff_logs",
    "all",
];

fn to_json<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Render the requested slice of the session context.
pub fn read_context(session: &SessionContext, data_type: &str) -> Option<Value> {
    let body = match data_type {
        "name" => json!({"name": session.name(), "message": "Retrieved user's name"}),
        "goal" => json!({"goal": to_json(&session.goal), "message": "Retrieved user's fitness goal"}),
        "workout_plan" => json!({
            "workout_plan": to_json(&session.workout_plan),
            "message": "Retrieved current workout plan"
        }),
        "meal_plan" => json!({
            "meal_plan": to_json(&session.meal_plan),
            "message": "Retrieved current meal plan"
        }),
        "diet_preferences" => json!({
            "diet_preferences": to_json(&session.diet_preferences),
            "message": "Retrieved user's dietary preferences"
        }),
        "injury_notes" => json!({
            "injury_notes": to_json(&session.injury_notes),
            "message": "Retrieved injury information"
        }),
        "progress_logs" => json!({
            "progress_logs": to_json(&session.progress_log),
            "message": format!("Retrieved {} progress log entries", session.progress_log.len())
        }),
        "handoff_logs" => json!({
            "handoff_logs": session.handoff_log,
            "message": format!("Retrieved {} handoff log entries", session.handoff_log.len())
        }),
        "all" => json!({
            "name": session.name(),
            "goal": to_json(&session.goal),
            "workout_plan": to_json(&session.workout_plan),
            "meal_plan": to_json(&session.meal_plan),
            "diet_preferences": to_json(&session.diet_preferences),
            "injury_notes": to_json(&session.injury_notes),
            "progress_logs": to_json(&session.progress_log),
            "handoff_logs": session.handoff_log,
            "message": "Retrieved all available context data"
        }),
        _ => return None,
    };
    Some(body)
}

#[derive(Debug, Deserialize)]
struct ReadArgs {
    data_type: String,
}

pub struct ReadContextDataTool;

#[async_trait]
impl Tool for ReadContextDataTool {
    fn name(&self) -> &str {
        "read_context_data"
    }

    fn description(&self) -> &str {
        "Read stored user data from the session: name, goal, workout plan, meal plan, dietary \
         preferences, injury notes, progress logs, handoff logs, or all of them."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "data_type": {"type": "string", "enum": DATA_TYPES}
            },
            "required": ["data_type"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, ctx: &mut ToolContext<'_>) -> Result<ToolResult, ToolError> {
        let args: ReadArgs = parse_args(args)?;
        let body = read_context(&*ctx.session, &args.data_type)
            .ok_or_else(|| ToolError::InvalidArguments(format!("unknown data_type: {}", args.data_type)))?;
        Ok(ToolResult::json(&body))
    }
}

#[derive(Debug, Deserialize)]
struct InjuryArgs {
    injury_description: String,
    severity_level: String,
    affected_body_parts: Vec<String>,
    restrictions: Vec<String>,
    notes: Option<String>,
}

pub struct AddInjuryNoteTool;

#[async_trait]
impl Tool for AddInjuryNoteTool {
    fn name(&self) -> &str {
        "add_injury_note"
    }

    fn description(&self) -> &str {
        "Record an injury or physical limitation so later workout recommendations can work around it."
    }

    fn parameters_schema(&self) -> Value {
        let list = json!({"type": "array", "items": {"type": "string"}});
        json!({
            "type": "object",
            "properties": {
                "injury_description": {"type": "string"},
                "severity_level": {"type": "string", "enum": ["mild", "moderate", "severe"]},
                "affected_body_parts": list,
                "restrictions": list,
                "notes": {"type": "string"}
            },
            "required": ["injury_description", "severity_level", "affected_body_parts", "restrictions"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, ctx: &mut ToolContext<'_>) -> Result<ToolResult, ToolError> {
        let start = Instant::now();
        let args: InjuryArgs = parse_args(args)?;
        let note = InjuryNote {
            injury_description: args.injury_description,
            severity_level: args.severity_level,
            affected_body_parts: args.affected_body_parts,
            restrictions: args.restrictions,
            notes: args.notes,
        };
        ctx.session.injury_notes.push(note.clone());

        let body = json!({
            "injury_note": note,
            "message": format!(
                "Injury information recorded: {} (Severity: {})",
                note.injury_description, note.severity_level
            ),
            "affected_parts": note.affected_body_parts,
            "restrictions": note.restrictions,
        });
        let mut result = ToolResult::json(&body);
        result.duration = start.elapsed();
        Ok(result)
    }
}

/// Calendar facts for `now`, so agents never ask the user for the date.
pub fn time_facts(now: DateTime<Utc>) -> Value {
    json!({
        "current_datetime": now.to_rfc3339(),
        "current_date": now.format("%Y-%m-%d").to_string(),
        "current_time": format!("{:02}:{:02}:{:02}", now.hour(), now.minute(), now.second()),
        "current_year": now.year(),
        "current_month": now.month(),
        "current_day": now.day(),
        "current_weekday": now.format("%A").to_string(),
        "current_weekday_number": now.weekday().num_days_from_monday(),
        "timezone": "UTC",
    })
}

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current UTC date and time: ISO timestamp, date, time, year, month, day and weekday \
         (0 = Monday). Use this instead of asking the user for the date."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}, "additionalProperties": false})
    }

    async fn execute(&self, _args: Value, _ctx: &mut ToolContext<'_>) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::json(&time_facts(Utc::now())))
    }
}
