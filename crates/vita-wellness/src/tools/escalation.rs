use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use vita_core::tools::{Tool, ToolContext, ToolError, ToolResult};

use super::parse_args;

pub const COACH_EMAIL: &str = "coach@healthwellness.com";
pub const COACH_PHONE: &str = "+1-800-HEALTH-1";
pub const ESTIMATED_WAIT: &str = "5-10 minutes";
pub const NEXT_STEPS: &str = "A human coach will contact you shortly to provide personalized guidance.";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EscalationConfirmation {
    pub escalation_id: String,
    pub status: String,
    pub contact_email: String,
    pub contact_phone: String,
    pub estimated_wait_time: String,
    pub next_steps: String,
}

/// `ESC-<yyyymmdd-hhmmss>-<uid>`
pub fn escalation_id<Tz: TimeZone>(at: &DateTime<Tz>, uid: &str) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("ESC-{}-{uid}", at.format("%Y%m%d-%H%M%S"))
}

#[derive(Debug, Deserialize)]
struct Args {
    request_type: Option<String>,
    #[serde(default = "default_urgency")]
    urgency_level: String,
    additional_notes: Option<String>,
}

fn default_urgency() -> String {
    "normal".into()
}

/// Hands the user over to a human coach and returns the contact details.
pub struct EscalateToCoachTool;

#[async_trait]
impl Tool for EscalateToCoachTool {
    fn name(&self) -> &str {
        "escalate_to_human_coach"
    }

    fn description(&self) -> &str {
        "Escalate the user's request to a human coach or support representative. Returns an \
         escalation id, contact details, the estimated wait time and next steps."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "request_type": {"type": "string", "enum": ["coach", "support", "emergency"]},
                "urgency_level": {"type": "string", "enum": ["low", "normal", "high", "emergency"]},
                "additional_notes": {"type": "string"}
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, ctx: &mut ToolContext<'_>) -> Result<ToolResult, ToolError> {
        let args: Args = parse_args(args)?;
        let session = &*ctx.session;

        let confirmation = EscalationConfirmation {
            escalation_id: escalation_id(&Local::now(), session.uid()),
            status: "escalated".into(),
            contact_email: COACH_EMAIL.into(),
            contact_phone: COACH_PHONE.into(),
            estimated_wait_time: ESTIMATED_WAIT.into(),
            next_steps: NEXT_STEPS.into(),
        };
        info!(
            escalation_id = %confirmation.escalation_id,
            request_type = args.request_type.as_deref().unwrap_or("coach"),
            urgency = %args.urgency_level,
            "escalated to human coach"
        );

        let body = json!({
            "escalation_confirmation": confirmation,
            "user_name": session.name(),
            "escalation_logged": true,
            "request_type": args.request_type,
            "urgency_level": args.urgency_level,
            "additional_notes": args.additional_notes,
            "message": format!(
                "Hi {}, I'm connecting you to a human coach now. Please wait while I transfer you.",
                session.name()
            ),
            "session_summary": {
                "total_handoffs": session.handoff_log.len(),
                "user_goal": session.goal,
                "progress_updates": session.progress_log.len(),
            },
        });
        Ok(ToolResult::json(&body))
    }
}
