//! Incremental parser for OpenAI-compatible `chat/completions` streams.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use vita_core::errors::GatewayError;
use vita_core::ids::ToolCallId;
use vita_core::messages::{AssistantContent, AssistantMessage, StopReason, ToolCallBlock};
use vita_core::stream::StreamEvent;
use vita_core::tokens::TokenUsage;

/// State machine turning `data:` payloads into [`StreamEvent`]s.
#[derive(Default)]
pub struct ChatStreamParser {
    started: bool,
    text: Option<String>,
    // Tool-call fragments are keyed by the index the backend assigns.
    tool_calls: BTreeMap<u32, PartialToolCall>,
    usage: TokenUsage,
    finish_reason: Option<String>,
    done: bool,
}

#[derive(Default)]
struct PartialToolCall {
    announced: bool,
    id: String,
    name: String,
    arguments: String,
}

impl ChatStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn token_usage(&self) -> TokenUsage {
        self.usage
    }

    /// Parse one `data:` payload and return zero or more StreamEvents.
    pub fn parse_data(&mut self, data: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }

        if data.trim() == "[DONE]" {
            events.extend(self.finish());
            return events;
        }

        let chunk: ChatChunk = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => {
                self.done = true;
                events.push(StreamEvent::Error {
                    error: GatewayError::MalformedResponse(format!("bad stream chunk: {e}")),
                });
                return events;
            }
        };

        if let Some(err) = chunk.error {
            self.done = true;
            events.push(StreamEvent::Error { error: classify_error(&err) });
            return events;
        }

        if !self.started {
            self.started = true;
            events.push(StreamEvent::Start);
        }

        if let Some(usage) = chunk.usage {
            self.usage = TokenUsage::new(
                usage.prompt_tokens.unwrap_or(0),
                usage.completion_tokens.unwrap_or(0),
            );
        }

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                match &mut self.text {
                    Some(text) => text.push_str(&content),
                    None => {
                        self.text = Some(content.clone());
                        events.push(StreamEvent::TextStart);
                    }
                }
                events.push(StreamEvent::TextDelta { delta: content });
            }

            for delta in choice.delta.tool_calls.unwrap_or_default() {
                let entry = self.tool_calls.entry(delta.index).or_default();
                if let Some(id) = delta.id {
                    entry.id = id;
                }
                let (name, args) = match delta.function {
                    Some(f) => (f.name, f.arguments.filter(|a| !a.is_empty())),
                    None => (None, None),
                };
                if let Some(name) = name {
                    entry.name.push_str(&name);
                }
                if !entry.announced && !entry.name.is_empty() {
                    entry.announced = true;
                    if entry.id.is_empty() {
                        entry.id = ToolCallId::new().to_string();
                    }
                    events.push(StreamEvent::ToolCallStart {
                        tool_call_id: ToolCallId::from_raw(&entry.id),
                        name: entry.name.clone(),
                    });
                }
                if let Some(args) = args {
                    entry.arguments.push_str(&args);
                    if entry.announced {
                        events.push(StreamEvent::ToolCallDelta {
                            tool_call_id: ToolCallId::from_raw(&entry.id),
                            arguments_delta: args,
                        });
                    }
                }
            }

            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(reason);
            }
        }

        events
    }

    /// Close open blocks and emit `Done`. Idempotent.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }
        self.done = true;
        if !self.started {
            events.push(StreamEvent::Start);
        }

        let mut content = Vec::new();
        if let Some(text) = self.text.take() {
            events.push(StreamEvent::TextEnd { text: text.clone() });
            content.push(AssistantContent::Text { text });
        }
        for call in std::mem::take(&mut self.tool_calls).into_values() {
            let arguments = if call.arguments.trim().is_empty() {
                Value::Object(serde_json::Map::new())
            } else {
                match serde_json::from_str(&call.arguments) {
                    Ok(v) => v,
                    Err(e) => {
                        events.push(StreamEvent::Error {
                            error: GatewayError::MalformedResponse(format!(
                                "tool call {} has invalid arguments: {e}",
                                call.name
                            )),
                        });
                        return events;
                    }
                }
            };
            let block = ToolCallBlock {
                id: ToolCallId::from_raw(call.id),
                name: call.name,
                arguments,
            };
            events.push(StreamEvent::ToolCallEnd { tool_call: block.clone() });
            content.push(AssistantContent::ToolCall(block));
        }

        let has_tools = content.iter().any(|c| matches!(c, AssistantContent::ToolCall(_)));
        let stop_reason = match self.finish_reason.as_deref() {
            _ if has_tools => StopReason::ToolUse,
            Some("length") => StopReason::MaxTokens,
            Some("stop") | None => StopReason::EndTurn,
            Some(_) => StopReason::EndTurn,
        };
        events.push(StreamEvent::Done {
            message: AssistantMessage {
                content,
                usage: Some(self.usage),
                stop_reason: Some(stop_reason.clone()),
            },
            stop_reason,
        });
        events
    }
}

fn classify_error(err: &ErrorPayload) -> GatewayError {
    match err.code.as_ref().and_then(Value::as_u64) {
        Some(code) => GatewayError::from_status(code as u16, err.message.clone()),
        None => match err.status.as_deref() {
            Some("RESOURCE_EXHAUSTED") => GatewayError::RateLimited { retry_after: None },
            Some("UNAVAILABLE") => GatewayError::ProviderOverloaded,
            Some("UNAUTHENTICATED") | Some("PERMISSION_DENIED") => {
                GatewayError::AuthenticationFailed(err.message.clone())
            }
            _ => GatewayError::ServerError { status: 500, body: err.message.clone() },
        },
    }
}

/// Collect the `data:` payloads of every complete event in `raw`.
/// Multi-line data fields are joined with `\n`; comments and other fields are ignored.
pub fn parse_sse_lines(raw: &str) -> Vec<String> {
    let mut payloads = Vec::new();
    let mut current: Option<String> = None;

    for line in raw.lines() {
        if let Some(data) = line.strip_prefix("data:") {
            let data = data.strip_prefix(' ').unwrap_or(data);
            match &mut current {
                Some(buf) => {
                    buf.push('\n');
                    buf.push_str(data);
                }
                None => current = Some(data.to_string()),
            }
        } else if line.is_empty() {
            if let Some(buf) = current.take() {
                payloads.push(buf);
            }
        }
    }

    // Handle trailing event without blank line
    if let Some(buf) = current {
        payloads.push(buf);
    }

    payloads
}

// --- Deserialization types for chat completion chunks ---

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<UsagePayload>,
    error: Option<ErrorPayload>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: u32,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct UsagePayload {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: String,
    code: Option<Value>,
    status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(parser: &mut ChatStreamParser, payloads: &[&str]) -> Vec<StreamEvent> {
        payloads.iter().flat_map(|p| parser.parse_data(p)).collect()
    }

    #[test]
    fn text_stream() {
        let mut parser = ChatStreamParser::new();
        let events = run(
            &mut parser,
            &[
                r#"{"choices":[{"index":0,"delta":{"role":"assistant","content":"Hel"}}]}"#,
                r#"{"choices":[{"index":0,"delta":{"content":"lo"},"finish_reason":"stop"}]}"#,
                r#"{"choices":[],"usage":{"prompt_tokens":40,"completion_tokens":2}}"#,
                "[DONE]",
            ],
        );
        assert!(matches!(events[0], StreamEvent::Start));
        assert!(matches!(events[1], StreamEvent::TextStart));
        let deltas: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::TextDelta { delta } => Some(delta.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(deltas, "Hello");
        match events.last() {
            Some(StreamEvent::Done { message, stop_reason }) => {
                assert_eq!(*stop_reason, StopReason::EndTurn);
                assert_eq!(message.text_content(), "Hello");
                assert_eq!(message.usage, Some(TokenUsage::new(40, 2)));
            }
            other => panic!("expected Done, got {other:?}"),
        }
        assert!(parser.is_done());
        assert!(parser.parse_data("[DONE]").is_empty());
    }

    #[test]
    fn tool_call_arguments_accumulate_by_index() {
        let mut parser = ChatStreamParser::new();
        let events = run(
            &mut parser,
            &[
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","type":"function","function":{"name":"meal_planner","arguments":"{\"diet\":"}}]}}]}"#,
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"vegan\"}"}}]}}]}"#,
                r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"get_current_time","arguments":""}}]},"finish_reason":"tool_calls"}]}"#,
                "[DONE]",
            ],
        );
        let starts = events.iter().filter(|e| matches!(e, StreamEvent::ToolCallStart { .. })).count();
        assert_eq!(starts, 2);
        match events.last() {
            Some(StreamEvent::Done { message, stop_reason }) => {
                assert_eq!(*stop_reason, StopReason::ToolUse);
                let calls = message.tool_calls();
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[0].id.as_str(), "call_a");
                assert_eq!(calls[0].arguments["diet"], "vegan");
                assert_eq!(calls[1].name, "get_current_time");
                assert!(calls[1].arguments.as_object().unwrap().is_empty());
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn error_payload_is_classified() {
        let mut parser = ChatStreamParser::new();
        let events = parser.parse_data(r#"{"error":{"code":429,"message":"quota","status":"RESOURCE_EXHAUSTED"}}"#);
        assert!(matches!(
            &events[0],
            StreamEvent::Error { error: GatewayError::RateLimited { .. } }
        ));
        assert!(parser.is_done());
    }

    #[test]
    fn malformed_chunk_ends_stream() {
        let mut parser = ChatStreamParser::new();
        let events = parser.parse_data("{not json");
        assert!(matches!(
            &events[0],
            StreamEvent::Error { error: GatewayError::MalformedResponse(_) }
        ));
        assert!(parser.finish().is_empty());
    }

    #[test]
    fn parse_sse_lines_basic() {
        let raw = ": keep-alive\n\ndata: {\"a\":1}\n\ndata: line1\ndata: line2\n\ndata: [DONE]";
        let payloads = parse_sse_lines(raw);
        assert_eq!(payloads, vec![r#"{"a":1}"#, "line1\nline2", "[DONE]"]);
    }
}
