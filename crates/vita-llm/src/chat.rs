use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Future, Stream};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument};

use vita_core::context::LlmContext;
use vita_core::errors::GatewayError;
use vita_core::provider::{EventStream, LlmProvider, StreamOptions};
use vita_core::stream::StreamEvent;

use crate::converter;
use crate::sse::{self, ChatStreamParser};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai/";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Clone, Debug)]
pub struct ChatCompletionsConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: SecretString,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl ChatCompletionsConfig {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key,
            connect_timeout: CONNECT_TIMEOUT,
            idle_timeout: SSE_IDLE_TIMEOUT,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// Streaming client for any OpenAI-compatible `chat/completions` endpoint.
pub struct ChatCompletionsProvider {
    client: Client,
    config: ChatCompletionsConfig,
}

impl ChatCompletionsProvider {
    pub fn new(config: ChatCompletionsConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| GatewayError::InvalidRequest(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl LlmProvider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        "chat_completions"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip(self, context, options), fields(model = %self.config.model, structured = context.is_structured()))]
    async fn stream(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<EventStream, GatewayError> {
        let body = converter::build_request_body(context, options, &self.config.model);
        debug!(messages = context.messages.len(), tools = context.tools.len(), "sending request");

        let resp = self
            .client
            .post(self.config.endpoint())
            .bearer_auth(self.config.api_key.expose_secret())
            .header("accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(self.config.connect_timeout)
                } else {
                    GatewayError::NetworkError(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = resp.text().await.unwrap_or_default();
            return Err(match GatewayError::from_status(status, body) {
                GatewayError::RateLimited { .. } => GatewayError::RateLimited { retry_after },
                other => other,
            });
        }

        Ok(Box::pin(SseStream::with_idle_timeout(
            resp.bytes_stream(),
            self.config.idle_timeout,
        )))
    }
}

/// Wraps a byte stream from reqwest and yields StreamEvents.
/// Includes an idle timeout: if no data arrives within `idle_duration`, emits an error.
struct SseStream {
    inner: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    parser: ChatStreamParser,
    buffer: String,
    pending: std::collections::VecDeque<StreamEvent>,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
    finished: bool,
}

impl SseStream {
    fn with_idle_timeout(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            parser: ChatStreamParser::new(),
            buffer: String::new(),
            pending: Default::default(),
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_duration: idle_timeout,
            finished: false,
        }
    }

    fn drain_complete_events(&mut self) {
        // Normalize CRLF framing so "\n\n" always separates events.
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }
        while let Some(pos) = self.buffer.find("\n\n") {
            let chunk: String = self.buffer.drain(..pos + 2).collect();
            for data in sse::parse_sse_lines(&chunk) {
                self.pending.extend(self.parser.parse_data(&data));
            }
        }
    }
}

impl Stream for SseStream {
    type Item = StreamEvent;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::task::Poll;

        loop {
            if let Some(event) = self.pending.pop_front() {
                if event.is_terminal() {
                    self.finished = true;
                }
                return Poll::Ready(Some(event));
            }
            if self.finished {
                return Poll::Ready(None);
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let new_deadline = tokio::time::Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(new_deadline);

                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    self.buffer.push_str(&text);
                    self.drain_complete_events();
                }
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(StreamEvent::Error {
                        error: GatewayError::StreamInterrupted(e.to_string()),
                    }));
                }
                Poll::Ready(None) => {
                    let remaining = std::mem::take(&mut self.buffer);
                    for data in sse::parse_sse_lines(&remaining) {
                        let events = self.parser.parse_data(&data);
                        self.pending.extend(events);
                    }
                    // A body that ends without [DONE] still yields a final message.
                    let tail = self.parser.finish();
                    self.pending.extend(tail);
                    if self.pending.is_empty() {
                        self.finished = true;
                    }
                }
                Poll::Pending => {
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        self.finished = true;
                        return Poll::Ready(Some(StreamEvent::Error {
                            error: GatewayError::StreamInterrupted(format!(
                                "idle timeout after {}s",
                                self.idle_duration.as_secs()
                            )),
                        }));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn provider() -> ChatCompletionsProvider {
        ChatCompletionsProvider::new(ChatCompletionsConfig::new(SecretString::from("test-key"))).unwrap()
    }

    #[test]
    fn provider_properties() {
        let p = provider();
        assert_eq!(p.name(), "chat_completions");
        assert_eq!(p.model(), DEFAULT_MODEL);
        assert!(p.supports_tools());
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let cfg = ChatCompletionsConfig::new(SecretString::from("k"));
        assert_eq!(
            cfg.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions"
        );
    }

    fn byte_stream(
        chunks: Vec<&'static str>,
    ) -> impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static {
        futures::stream::iter(chunks.into_iter().map(|c| Ok(bytes::Bytes::from(c))))
    }

    #[tokio::test]
    async fn sse_stream_reassembles_split_events() {
        let stream = SseStream::with_idle_timeout(
            byte_stream(vec![
                "data: {\"choices\":[{\"delta\":{\"content\":\"Stay \"}}]}\n",
                "\ndata: {\"choices\":[{\"delta\":{\"content\":\"hydrated\"},\"finish_reason\":\"stop\"}]}\r\n\r\n",
                "data: [DONE]\n\n",
            ]),
            Duration::from_secs(5),
        );
        let events: Vec<StreamEvent> = stream.collect().await;
        match events.last() {
            Some(StreamEvent::Done { message, .. }) => assert_eq!(message.text_content(), "Stay hydrated"),
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sse_stream_finishes_without_done_marker() {
        let stream = SseStream::with_idle_timeout(
            byte_stream(vec!["data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}"]),
            Duration::from_secs(5),
        );
        let events: Vec<StreamEvent> = stream.collect().await;
        assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
    }

    #[tokio::test]
    async fn sse_stream_idle_timeout_fires_when_no_data() {
        tokio::time::pause();

        let byte_stream = futures::stream::pending::<Result<bytes::Bytes, reqwest::Error>>();
        let mut stream = Box::pin(SseStream::with_idle_timeout(byte_stream, Duration::from_secs(5)));

        tokio::time::advance(Duration::from_secs(6)).await;

        let event = stream.next().await;
        assert!(
            matches!(&event, Some(StreamEvent::Error { error: GatewayError::StreamInterrupted(msg) }) if msg.contains("idle timeout")),
            "expected idle timeout error, got: {event:?}"
        );
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn sse_stream_idle_timeout_resets_on_data() {
        tokio::time::pause();

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<bytes::Bytes, reqwest::Error>>(16);
        let rx_stream = tokio_stream::wrappers::ReceiverStream::new(rx);
        let mut stream = Box::pin(SseStream::with_idle_timeout(rx_stream, Duration::from_secs(5)));

        tx.send(Ok(bytes::Bytes::from("data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n")))
            .await
            .unwrap();
        assert!(matches!(stream.next().await, Some(StreamEvent::Start)));

        tokio::time::advance(Duration::from_secs(4)).await;
        tx.send(Ok(bytes::Bytes::from("data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\n")))
            .await
            .unwrap();
        drop(tx);

        let rest: Vec<StreamEvent> = stream.collect().await;
        assert!(rest.iter().all(|e| !matches!(e, StreamEvent::Error { .. })));
        assert!(matches!(rest.last(), Some(StreamEvent::Done { .. })));
    }
}
