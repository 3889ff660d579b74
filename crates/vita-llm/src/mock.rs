use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;

use vita_core::context::LlmContext;
use vita_core::errors::GatewayError;
use vita_core::ids::ToolCallId;
use vita_core::messages::{AssistantContent, AssistantMessage, StopReason, ToolCallBlock};
use vita_core::provider::{EventStream, LlmProvider, StreamOptions};
use vita_core::stream::StreamEvent;
use vita_core::tokens::TokenUsage;

/// Usage reported by every scripted `Done` event.
pub const MOCK_USAGE: TokenUsage = TokenUsage { input_tokens: 12, output_tokens: 8 };

/// Pre-programmed responses for deterministic testing without API calls.
pub enum MockResponse {
    /// Yield a sequence of StreamEvents.
    Stream(Vec<StreamEvent>),
    /// Yield the events, then never finish.
    Hang(Vec<StreamEvent>),
    /// Return an error from the stream() call itself.
    Error(GatewayError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// A single-delta text response.
    pub fn stream_text(text: &str) -> Self {
        Self::stream_chunks(&[text])
    }

    /// A text response delivered as several deltas.
    pub fn stream_chunks(chunks: &[&str]) -> Self {
        Self::Stream(text_events(chunks, true))
    }

    /// A structured-output answer; the JSON document is streamed as text.
    pub fn structured(value: serde_json::Value) -> Self {
        Self::stream_text(&value.to_string())
    }

    /// A response consisting of one tool call.
    pub fn tool_call(name: &str, arguments: serde_json::Value) -> Self {
        Self::tool_calls(None, vec![(name, arguments)])
    }

    /// Optional leading text followed by one or more tool calls.
    pub fn tool_calls(text: Option<&str>, calls: Vec<(&str, serde_json::Value)>) -> Self {
        let mut events = match text {
            Some(t) => text_events(&[t], false),
            None => vec![StreamEvent::Start],
        };
        let mut content: Vec<AssistantContent> = text
            .map(|t| AssistantContent::Text { text: t.to_string() })
            .into_iter()
            .collect();
        for (name, arguments) in calls {
            let block = ToolCallBlock {
                id: ToolCallId::new(),
                name: name.to_string(),
                arguments,
            };
            events.push(StreamEvent::ToolCallStart {
                tool_call_id: block.id.clone(),
                name: block.name.clone(),
            });
            events.push(StreamEvent::ToolCallDelta {
                tool_call_id: block.id.clone(),
                arguments_delta: block.arguments.to_string(),
            });
            events.push(StreamEvent::ToolCallEnd { tool_call: block.clone() });
            content.push(AssistantContent::ToolCall(block));
        }
        events.push(StreamEvent::Done {
            message: AssistantMessage {
                content,
                usage: Some(MOCK_USAGE),
                stop_reason: Some(StopReason::ToolUse),
            },
            stop_reason: StopReason::ToolUse,
        });
        Self::Stream(events)
    }

    /// Convenience: create a stream that ends with an error event.
    pub fn stream_error(error: GatewayError) -> Self {
        Self::Stream(vec![StreamEvent::Start, StreamEvent::Error { error }])
    }

    /// Emit the given text deltas and then stall forever.
    pub fn hang_after(chunks: &[&str]) -> Self {
        let mut events = vec![StreamEvent::Start, StreamEvent::TextStart];
        events.extend(chunks.iter().map(|c| StreamEvent::TextDelta { delta: c.to_string() }));
        Self::Hang(events)
    }

    /// Convenience: wrap any response with a delay.
    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

fn text_events(chunks: &[&str], done: bool) -> Vec<StreamEvent> {
    let text: String = chunks.concat();
    let mut events = vec![StreamEvent::Start, StreamEvent::TextStart];
    events.extend(chunks.iter().map(|c| StreamEvent::TextDelta { delta: c.to_string() }));
    events.push(StreamEvent::TextEnd { text: text.clone() });
    if done {
        let mut message = AssistantMessage::text(text);
        message.usage = Some(MOCK_USAGE);
        events.push(StreamEvent::Done { message, stop_reason: StopReason::EndTurn });
    }
    events
}

type Router = dyn Fn(&LlmContext) -> MockResponse + Send + Sync;

enum Source {
    Queue(Mutex<VecDeque<MockResponse>>),
    Router(Box<Router>),
}

/// Mock provider that returns pre-programmed responses.
///
/// Either replays a queue in call order or routes each request through a
/// closure (useful when calls race, e.g. concurrent guardrail checks).
/// Every received context is captured for assertions.
pub struct MockProvider {
    source: Source,
    requests: Mutex<Vec<LlmContext>>,
    call_count: AtomicUsize,
    open_streams: Arc<AtomicUsize>,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self::with_source(Source::Queue(Mutex::new(responses.into())))
    }

    pub fn from_fn(router: impl Fn(&LlmContext) -> MockResponse + Send + Sync + 'static) -> Self {
        Self::with_source(Source::Router(Box::new(router)))
    }

    fn with_source(source: Source) -> Self {
        Self {
            source,
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
            open_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Contexts received so far, in call order.
    pub fn requests(&self) -> Vec<LlmContext> {
        self.requests.lock().clone()
    }

    /// Scripted responses not yet consumed.
    pub fn remaining(&self) -> usize {
        match &self.source {
            Source::Queue(q) => q.lock().len(),
            Source::Router(_) => 0,
        }
    }

    /// Streams handed out and not yet dropped.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }
}

struct OpenStreamGuard(Arc<AtomicUsize>);

impl Drop for OpenStreamGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn stream(
        &self,
        context: &LlmContext,
        _options: &StreamOptions,
    ) -> Result<EventStream, GatewayError> {
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(context.clone());

        let response = match &self.source {
            Source::Queue(queue) => queue.lock().pop_front().ok_or_else(|| {
                GatewayError::InvalidRequest(format!(
                    "MockProvider: no response configured for call {idx}"
                ))
            })?,
            Source::Router(router) => router(context),
        };

        let inner = resolve_response(response).await?;
        self.open_streams.fetch_add(1, Ordering::SeqCst);
        let guard = OpenStreamGuard(self.open_streams.clone());
        Ok(Box::pin(inner.map(move |event| {
            let _held = &guard;
            event
        })))
    }
}

/// Resolve a MockResponse, handling Delay by sleeping first.
/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(response: MockResponse) -> Result<EventStream, GatewayError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Stream(events) => return Ok(Box::pin(stream::iter(events))),
            MockResponse::Hang(events) => {
                return Ok(Box::pin(stream::iter(events).chain(stream::pending())));
            }
            MockResponse::Error(e) => return Err(e),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
        }
    }
}
