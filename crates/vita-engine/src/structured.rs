//! Single-shot structured inference: one call, one JSON document back.

use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use vita_core::context::LlmContext;
use vita_core::errors::GatewayError;
use vita_core::provider::{LlmProvider, StreamOptions};
use vita_core::stream::StreamEvent;

#[derive(Debug, thiserror::Error)]
pub enum StructuredError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("unparseable structured output: {0}")]
    Parse(String),
    #[error("cancelled")]
    Cancelled,
}

/// Run `ctx` to completion and parse the answer as JSON.
#[instrument(skip_all, fields(schema = ctx.output_schema.as_ref().map(|s| s.name.as_str())))]
pub async fn run_structured(
    provider: &dyn LlmProvider,
    ctx: &LlmContext,
    cancel: &CancellationToken,
) -> Result<Value, StructuredError> {
    let options = StreamOptions::deterministic();
    let mut stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(StructuredError::Cancelled),
        s = provider.stream(ctx, &options) => s?,
    };

    let mut text = String::new();
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StructuredError::Cancelled),
            ev = stream.next() => ev,
        };
        if let Some(fragment) = event.as_ref().and_then(StreamEvent::visible_text) {
            text.push_str(fragment);
            continue;
        }
        match event {
            Some(StreamEvent::Done { message, .. }) => {
                let full = message.text_content();
                if !full.is_empty() {
                    text = full;
                }
                break;
            }
            Some(StreamEvent::Error { error }) => return Err(error.into()),
            Some(_) => {}
            None => break,
        }
    }
    debug!(bytes = text.len(), "structured answer received");
    parse_json_document(&text)
}

/// [`run_structured`] decoded into a concrete type.
pub async fn run_structured_as<T: DeserializeOwned>(
    provider: &dyn LlmProvider,
    ctx: &LlmContext,
    cancel: &CancellationToken,
) -> Result<T, StructuredError> {
    let value = run_structured(provider, ctx, cancel).await?;
    serde_json::from_value(value).map_err(|e| StructuredError::Parse(e.to_string()))
}

/// Parse a model's JSON answer, tolerating Markdown code fences and surrounding prose.
pub fn parse_json_document(raw: &str) -> Result<Value, StructuredError> {
    let trimmed = strip_code_fence(raw.trim());
    if trimmed.is_empty() {
        return Err(StructuredError::Parse("empty answer".into()));
    }
    if let Ok(v) = serde_json::from_str(trimmed) {
        return Ok(v);
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => serde_json::from_str(&trimmed[start..=end])
            .map_err(|e| StructuredError::Parse(e.to_string())),
        _ => Err(StructuredError::Parse(format!(
            "no JSON object in answer: {}",
            trimmed.chars().take(80).collect::<String>()
        ))),
    }
}

fn strip_code_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    // drop the language tag line
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
