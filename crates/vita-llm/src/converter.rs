use serde_json::{json, Value};

use vita_core::context::LlmContext;
use vita_core::messages::{AssistantContent, AssistantMessage, Message};
use vita_core::provider::StreamOptions;

/// Convert a full LlmContext into a `chat/completions` request body.
pub fn build_request_body(context: &LlmContext, options: &StreamOptions, model: &str) -> Value {
    let mut body = json!({
        "model": model,
        "stream": true,
        "stream_options": {"include_usage": true},
    });

    if let Some(max) = options.max_tokens {
        body["max_tokens"] = json!(max);
    }
    if let Some(temp) = options.temperature {
        body["temperature"] = json!(temp);
    }
    if !options.stop_sequences.is_empty() {
        body["stop"] = json!(options.stop_sequences);
    }

    let mut messages = Vec::with_capacity(context.messages.len() + 1);
    if !context.instructions.is_empty() {
        messages.push(json!({"role": "system", "content": context.instructions}));
    }
    messages.extend(context.messages.iter().map(convert_message));
    body["messages"] = Value::Array(messages);

    if !context.tools.is_empty() {
        let tools: Vec<Value> = context
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters_schema,
                    }
                })
            })
            .collect();
        body["tools"] = Value::Array(tools);
    }

    if let Some(schema) = &context.output_schema {
        body["response_format"] = json!({
            "type": "json_schema",
            "json_schema": {
                "name": schema.name,
                "schema": schema.schema,
            }
        });
    }

    body
}

fn convert_message(msg: &Message) -> Value {
    match msg {
        Message::User(user) => json!({"role": "user", "content": user.content}),
        Message::Assistant(asst) => convert_assistant_message(asst),
        Message::ToolResult(tr) => json!({
            "role": "tool",
            "tool_call_id": tr.tool_call_id.as_str(),
            "content": tr.content,
        }),
    }
}

fn convert_assistant_message(msg: &AssistantMessage) -> Value {
    let text = msg.text_content();
    let mut out = json!({
        "role": "assistant",
        "content": if text.is_empty() { Value::Null } else { Value::String(text) },
    });

    let calls: Vec<Value> = msg
        .content
        .iter()
        .filter_map(|c| match c {
            AssistantContent::ToolCall(tc) => Some(json!({
                "id": tc.id.as_str(),
                "type": "function",
                "function": {
                    "name": tc.name,
                    // The wire format carries arguments as an encoded JSON string.
                    "arguments": tc.arguments.to_string(),
                }
            })),
            AssistantContent::Text { .. } => None,
        })
        .collect();
    if !calls.is_empty() {
        out["tool_calls"] = Value::Array(calls);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use vita_core::context::OutputSchema;
    use vita_core::ids::ToolCallId;
    use vita_core::messages::{StopReason, ToolCallBlock};
    use vita_core::tools::ToolDefinition;

    #[test]
    fn instructions_become_leading_system_message() {
        let mut ctx = LlmContext::empty();
        ctx.instructions = "You are a wellness planner.".into();
        ctx.messages.push(Message::user_text("hi"));
        let body = build_request_body(&ctx, &StreamOptions::default(), "gemini-2.0-flash");

        assert_eq!(body["model"], "gemini-2.0-flash");
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert!(body.get("tools").is_none());
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn tool_round_trip_shapes() {
        let id = ToolCallId::from_raw("call_9");
        let mut ctx = LlmContext::empty();
        ctx.messages = vec![
            Message::user_text("what time is it"),
            Message::Assistant(AssistantMessage {
                content: vec![AssistantContent::ToolCall(ToolCallBlock {
                    id: id.clone(),
                    name: "get_current_time".into(),
                    arguments: json!({}),
                })],
                usage: None,
                stop_reason: Some(StopReason::ToolUse),
            }),
            Message::tool_result(id, "get_current_time", r#"{"current_time":"10:00:00"}"#, false),
        ];
        ctx.tools.push(ToolDefinition {
            name: "get_current_time".into(),
            description: "Current UTC time".into(),
            parameters_schema: json!({"type": "object", "properties": {}}),
        });
        let body = build_request_body(&ctx, &StreamOptions::default(), "m");

        let asst = &body["messages"][1];
        assert!(asst["content"].is_null());
        assert_eq!(asst["tool_calls"][0]["function"]["arguments"], "{}");
        assert_eq!(body["messages"][2]["role"], "tool");
        assert_eq!(body["messages"][2]["tool_call_id"], "call_9");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "get_current_time");
    }

    #[test]
    fn output_schema_maps_to_response_format() {
        let ctx = LlmContext::structured(
            "classify",
            "text",
            OutputSchema { name: "HealthCheck".into(), schema: json!({"type": "object"}) },
        );
        let opts = StreamOptions { max_tokens: Some(512), temperature: Some(0.0), stop_sequences: vec![] };
        let body = build_request_body(&ctx, &opts, "m");
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["name"], "HealthCheck");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["temperature"], 0.0);
    }
}
