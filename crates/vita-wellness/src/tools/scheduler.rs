//! Local iCalendar check-in reminders.
//!
//! The file name, event id and every timestamp in the file derive from the
//! user, the frequency and the start date, so a repeated request produces the
//! same bytes and the file is left alone.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Days, Local, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use vita_core::tools::{Tool, ToolContext, ToolError, ToolResult};

use super::parse_args;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "DAILY",
            Self::Weekly => "WEEKLY",
            Self::Monthly => "MONTHLY",
        }
    }

    pub fn next_after(&self, date: NaiveDate) -> Option<NaiveDate> {
        match self {
            Self::Daily => date.checked_add_days(Days::new(1)),
            Self::Weekly => date.checked_add_days(Days::new(7)),
            Self::Monthly => date.checked_add_months(Months::new(1)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfirmation {
    pub event_id: String,
    pub user_id: String,
    pub frequency: Frequency,
    pub next_occurrence: NaiveDate,
    pub calendar_file: String,
    /// False when an identical file already existed.
    pub written: bool,
}

pub fn calendar_file_name(uid: &str, frequency: Frequency) -> String {
    format!("user_{uid}_{}_checkin.ics", frequency.as_str())
}

pub fn event_id(uid: &str, frequency: Frequency, start: NaiveDate) -> String {
    format!("checkin-{uid}-{}-{}@vita", frequency.as_str().to_lowercase(), start.format("%Y%m%d"))
}

fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' | ';' | ',' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

/// Serialize a single recurring 15-minute check-in event.
pub fn render_calendar(name: &str, id: &str, frequency: Frequency, start: NaiveDate) -> String {
    let stamp = format!("{}T000000Z", start.format("%Y%m%d"));
    let lines = [
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        "PRODID:-//vita//check-in scheduler//EN".to_string(),
        "BEGIN:VEVENT".to_string(),
        format!("UID:{id}"),
        format!("DTSTAMP:{stamp}"),
        format!("DTSTART:{stamp}"),
        "DURATION:PT15M".to_string(),
        format!("SUMMARY:{}", escape_text(&format!("Progress Check-in for {name}"))),
        format!("RRULE:FREQ={}", frequency.as_str()),
        "END:VEVENT".to_string(),
        "END:VCALENDAR".to_string(),
    ];
    let mut out = lines.join("\r\n");
    out.push_str("\r\n");
    out
}

/// Write `contents` unless the file already holds exactly that. Returns
/// whether a write happened.
async fn write_if_changed(path: &Path, contents: &str) -> std::io::Result<bool> {
    match tokio::fs::read_to_string(path).await {
        Ok(existing) if existing == contents => return Ok(false),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    tokio::fs::write(path, contents).await?;
    Ok(true)
}

#[derive(Debug, Deserialize)]
struct Args {
    frequency: Frequency,
    start_date: Option<String>,
}

pub struct CheckinSchedulerTool {
    calendar_dir: PathBuf,
}

impl CheckinSchedulerTool {
    pub fn new(calendar_dir: PathBuf) -> Self {
        Self { calendar_dir }
    }
}

#[async_trait]
impl Tool for CheckinSchedulerTool {
    fn name(&self) -> &str {
        "checkin_scheduler_local"
    }

    fn description(&self) -> &str {
        "Create a local iCalendar (.ics) file with a recurring progress check-in. Omit start_date \
         to start today."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "frequency": {"type": "string", "enum": ["DAILY", "WEEKLY", "MONTHLY"]},
                "start_date": {"type": "string", "description": "YYYY-MM-DD"}
            },
            "required": ["frequency"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, ctx: &mut ToolContext<'_>) -> Result<ToolResult, ToolError> {
        let args: Args = parse_args(args)?;
        let start = match args.start_date.as_deref() {
            Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|e| ToolError::InvalidArguments(format!("start_date '{raw}': {e}")))?,
            None => Local::now().date_naive(),
        };
        let next = args
            .frequency
            .next_after(start)
            .ok_or_else(|| ToolError::InvalidArguments(format!("start_date {start} is out of range")))?;

        let session = &*ctx.session;
        let id = event_id(session.uid(), args.frequency, start);
        let contents = render_calendar(session.name(), &id, args.frequency, start);
        let path = self.calendar_dir.join(calendar_file_name(session.uid(), args.frequency));

        tokio::fs::create_dir_all(&self.calendar_dir)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("create {}: {e}", self.calendar_dir.display())))?;
        let written = write_if_changed(&path, &contents)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("write {}: {e}", path.display())))?;
        if written {
            info!(path = %path.display(), frequency = args.frequency.as_str(), "check-in calendar written");
        } else {
            debug!(path = %path.display(), "check-in calendar unchanged");
        }

        // from here on the file exists; failures must not invite a retry
        let absolute = tokio::fs::canonicalize(&path)
            .await
            .map_err(|e| ToolError::EffectApplied(format!("calendar saved but path lookup failed: {e}")))?;

        let confirmation = ScheduleConfirmation {
            event_id: id,
            user_id: session.uid().to_string(),
            frequency: args.frequency,
            next_occurrence: next,
            calendar_file: absolute.display().to_string(),
            written,
        };
        let body = serde_json::to_value(&confirmation).map_err(|e| ToolError::EffectApplied(e.to_string()))?;
        Ok(ToolResult::json(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::{output, run};
    use vita_core::session::SessionContext;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("vita-calendar-{}", uuid::Uuid::now_v7()))
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn next_occurrence_per_frequency() {
        let start = date("2026-01-31");
        assert_eq!(Frequency::Daily.next_after(start), Some(date("2026-02-01")));
        assert_eq!(Frequency::Weekly.next_after(start), Some(date("2026-02-07")));
        assert_eq!(Frequency::Monthly.next_after(start), Some(date("2026-02-28")));
    }

    #[test]
    fn calendar_text_is_escaped_and_crlf() {
        let ics = render_calendar("Doe, Jane", "id@vita", Frequency::Weekly, date("2026-04-08"));
        assert!(ics.contains("SUMMARY:Progress Check-in for Doe\\, Jane\r\n"));
        assert!(ics.contains("DTSTART:20260408T000000Z\r\n"));
        assert!(ics.contains("RRULE:FREQ=WEEKLY\r\n"));
        assert!(ics.ends_with("END:VCALENDAR\r\n"));
    }

    #[tokio::test]
    async fn writes_once_then_skips_identical_file() {
        let dir = temp_dir();
        let tool = CheckinSchedulerTool::new(dir.clone());
        let mut session = SessionContext::new("Ada", "u7");
        let args = json!({"frequency": "WEEKLY", "start_date": "2026-04-08"});

        let first = output(&run(&tool, &mut session, args.clone()).await.unwrap());
        assert_eq!(first["written"], true);
        assert_eq!(first["next_occurrence"], "2026-04-15");
        assert!(first["calendar_file"].as_str().unwrap().ends_with("user_u7_WEEKLY_checkin.ics"));

        let second = output(&run(&tool, &mut session, args).await.unwrap());
        assert_eq!(second["written"], false);
        assert_eq!(second["event_id"], first["event_id"]);

        let saved = std::fs::read_to_string(dir.join("user_u7_WEEKLY_checkin.ics")).unwrap();
        assert!(saved.contains("UID:checkin-u7-weekly-20260408@vita"));
        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn bad_start_date_is_invalid() {
        let tool = CheckinSchedulerTool::new(temp_dir());
        let mut session = SessionContext::new("Ada", "u7");
        let err = run(&tool, &mut session, json!({"frequency": "DAILY", "start_date": "next week"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
