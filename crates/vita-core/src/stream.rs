use crate::errors::GatewayError;
use crate::ids::ToolCallId;
use crate::messages::{AssistantMessage, StopReason, ToolCallBlock};

/// One item of a provider's response stream.
///
/// A well-formed stream opens with `Start`, then carries any number of text
/// blocks (`TextStart`, deltas, `TextEnd`) and tool-call blocks
/// (`ToolCallStart`, deltas, `ToolCallEnd`), and closes with `Done`. An
/// `Error` may replace `Done` at any point; nothing follows either of them.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    Start,

    TextStart,
    TextDelta { delta: String },
    TextEnd { text: String },

    ToolCallStart { tool_call_id: ToolCallId, name: String },
    ToolCallDelta { tool_call_id: ToolCallId, arguments_delta: String },
    ToolCallEnd { tool_call: ToolCallBlock },

    Done { message: AssistantMessage, stop_reason: StopReason },
    Error { error: GatewayError },
}

impl StreamEvent {
    /// `Done` or `Error`: the consumer can stop polling.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// Text the user would see, if this event carries any.
    pub fn visible_text(&self) -> Option<&str> {
        match self {
            Self::TextDelta { delta } => Some(delta),
            _ => None,
        }
    }
}
