use serde::{Deserialize, Serialize};

use crate::ids::ToolCallId;
use crate::tokens::TokenUsage;

/// One item of a session's history, tagged by `role` when serialized.
///
/// Tool results sit directly after the assistant message that requested
/// them, one per call, in call order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
    ToolResult(ToolResultMessage),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub content: Vec<AssistantContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
}

/// Output of one tool call, echoed back to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResultMessage {
    pub tool_call_id: ToolCallId,
    pub tool_name: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantContent {
    Text { text: String },
    ToolCall(ToolCallBlock),
}

/// A function call requested by the model; `arguments` is the decoded JSON object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallBlock {
    pub id: ToolCallId,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Message::User(UserMessage { content: text.into() })
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Message::Assistant(AssistantMessage::text(text))
    }

    pub fn tool_result(
        tool_call_id: ToolCallId,
        tool_name: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Message::ToolResult(ToolResultMessage {
            tool_call_id,
            tool_name: tool_name.into(),
            content: content.into(),
            is_error,
        })
    }

    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Message::Assistant(a) => Some(a),
            _ => None,
        }
    }
}

impl AssistantMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![AssistantContent::Text { text: text.into() }],
            usage: None,
            stop_reason: Some(StopReason::EndTurn),
        }
    }

    /// Calls in the order the model emitted them.
    pub fn tool_calls(&self) -> Vec<&ToolCallBlock> {
        self.content
            .iter()
            .filter_map(|block| match block {
                AssistantContent::ToolCall(call) => Some(call),
                AssistantContent::Text { .. } => None,
            })
            .collect()
    }

    /// Every text block joined together; empty for a pure tool-call reply.
    pub fn text_content(&self) -> String {
        let mut joined = String::new();
        for block in &self.content {
            if let AssistantContent::Text { text } = block {
                joined.push_str(text);
            }
        }
        joined
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_tags() {
        let json = serde_json::to_value(Message::user_text("hello")).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "hello");

        let json = serde_json::to_value(Message::assistant_text("world")).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"][0]["type"], "text");
    }

    #[test]
    fn tool_result_omits_false_error_flag() {
        let id = ToolCallId::from_raw("call_1");
        let ok = serde_json::to_value(Message::tool_result(id.clone(), "get_current_time", "{}", false))
            .unwrap();
        assert!(ok.get("is_error").is_none());
        assert_eq!(ok["tool_name"], "get_current_time");

        let err = serde_json::to_value(Message::tool_result(id, "meal_planner", "[error] x", true))
            .unwrap();
        assert_eq!(err["is_error"], true);
    }

    #[test]
    fn assistant_tool_calls_extracted() {
        let tc = ToolCallBlock {
            id: ToolCallId::new(),
            name: "meal_planner".into(),
            arguments: serde_json::json!({"diet": "vegan"}),
        };
        let msg = AssistantMessage {
            content: vec![
                AssistantContent::Text { text: "Let me build that. ".into() },
                AssistantContent::ToolCall(tc),
            ],
            usage: None,
            stop_reason: Some(StopReason::ToolUse),
        };
        assert!(msg.has_tool_calls());
        assert_eq!(msg.tool_calls()[0].name, "meal_planner");
        assert_eq!(msg.text_content(), "Let me build that. ");
    }

    #[test]
    fn history_deserializes() {
        let raw = r#"[
            {"role":"user","content":"hi"},
            {"role":"assistant","content":[{"type":"tool_call","id":"call_1","name":"get_current_time","arguments":{}}],"stop_reason":"tool_use"},
            {"role":"tool_result","tool_call_id":"call_1","tool_name":"get_current_time","content":"{}"}
        ]"#;
        let history: Vec<Message> = serde_json::from_str(raw).unwrap();
        assert_eq!(history.len(), 3);
        assert!(history[1].as_assistant().unwrap().has_tool_calls());
        assert!(matches!(&history[2], Message::ToolResult(r) if !r.is_error));
    }
}
