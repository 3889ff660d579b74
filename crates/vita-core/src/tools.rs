use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::ids::SessionId;
use crate::session::SessionContext;

/// What a running tool can see and change.
///
/// `session` is borrowed mutably for the whole call, so tool side effects on
/// goals, plans and logs are never interleaved.
pub struct ToolContext<'a> {
    pub session_id: &'a SessionId,
    /// Name of the agent that requested the call.
    pub agent: &'a str,
    pub session: &'a mut SessionContext,
    pub abort_signal: CancellationToken,
}

/// Tool output as fed back to the model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
    #[serde(rename = "duration_ms", with = "millis")]
    pub duration: Duration,
}

impl ToolResult {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), is_error: false, duration: Duration::ZERO }
    }

    /// Serialize a JSON payload as the tool output.
    pub fn json(value: &serde_json::Value) -> Self {
        Self::text(value.to_string())
    }
}

/// Function declaration advertised to the model for the active agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// A capability an agent may invoke, such as `meal_planner` or `get_current_time`.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &mut ToolContext<'_>,
    ) -> Result<ToolResult, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    /// The side effect happened but no response could be produced. Do not repeat the call.
    #[error("action completed but the result could not be reported: {0}")]
    EffectApplied(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
}

impl ToolError {
    /// Validation failures are rejected before the tool body runs.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::UnknownTool(_) | Self::InvalidArguments(_))
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(elapsed: &Duration, out: S) -> Result<S::Ok, S::Error> {
        out.serialize_u64(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(input: D) -> Result<Duration, D::Error> {
        u64::deserialize(input).map(Duration::from_millis)
    }
}
