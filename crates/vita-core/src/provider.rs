use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::context::LlmContext;
use crate::errors::GatewayError;
use crate::stream::StreamEvent;

/// Ordered provider output; see [`StreamEvent`] for the sequencing rules.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Sampling knobs forwarded with every request. `None` leaves the backend default.
#[derive(Clone, Debug, Default)]
pub struct StreamOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub stop_sequences: Vec<String>,
}

impl StreamOptions {
    /// Deterministic settings for classifier and extraction calls.
    pub fn deterministic() -> Self {
        Self { temperature: Some(0.0), ..Self::default() }
    }
}

/// A chat model the agents can talk to.
///
/// Implementations open one response stream per call. Retries, circuit
/// breaking and timeouts are layered on by wrappers, not by the backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    /// Whether the backend accepts function declarations.
    fn supports_tools(&self) -> bool {
        true
    }

    async fn stream(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<EventStream, GatewayError>;
}
