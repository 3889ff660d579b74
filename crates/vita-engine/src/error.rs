use vita_core::errors::GatewayError;

/// Shown to the user for any fatal turn failure; details go to telemetry and logs.
pub const GENERIC_ERROR_MESSAGE: &str =
    "I'm sorry, something went wrong while handling your request. Please try again in a moment.";

pub const BUSY_MESSAGE: &str =
    "I'm still working on your previous message. Please wait for it to finish.";

pub const ABORTED_MESSAGE: &str = "The request was cancelled.";

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("handoff from '{from}' to '{to}' is not declared")]
    HandoffTargetInvalid { from: String, to: String },

    #[error("tool-call round limit of {0} exceeded")]
    RoundLimitExceeded(u32),

    #[error("guardrail '{guardrail}' could not be evaluated: {reason}")]
    GuardrailCheck { guardrail: String, reason: String },

    #[error("session already has a turn in flight")]
    SessionBusy,

    #[error("turn aborted")]
    Aborted,

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    /// Short classification string for logs and telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Gateway(_) => "provider_transport",
            Self::HandoffTargetInvalid { .. } => "handoff_target_invalid",
            Self::RoundLimitExceeded(_) => "round_limit_exceeded",
            Self::GuardrailCheck { .. } => "guardrail_check",
            Self::SessionBusy => "session_busy",
            Self::Aborted => "aborted",
            Self::UnknownAgent(_) => "unknown_agent",
            Self::SessionNotFound(_) => "session_not_found",
            Self::Internal(_) => "internal",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::SessionBusy => BUSY_MESSAGE,
            Self::Aborted => ABORTED_MESSAGE,
            _ => GENERIC_ERROR_MESSAGE,
        }
    }
}
