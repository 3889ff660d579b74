use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use rand::Rng;
use tracing::{info, warn};

use vita_core::context::LlmContext;
use vita_core::errors::GatewayError;
use vita_core::provider::{EventStream, LlmProvider, StreamOptions};
use vita_core::stream::StreamEvent;

/// Retry and circuit breaker tuning for [`ReliableProvider`].
#[derive(Clone, Debug)]
pub struct ReliableConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the computed delay added or removed at random.
    pub jitter_factor: f64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter_factor: 0.2,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown: Duration::from_secs(30),
        }
    }
}

impl ReliableConfig {
    /// Wait before retry number `attempt + 1`. A server hint wins over the
    /// doubling schedule.
    fn backoff(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint;
        }
        let doubled = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        let capped = doubled.min(self.max_delay).as_secs_f64();
        let spread = capped * self.jitter_factor;
        let jitter = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        Duration::from_secs_f64((capped + jitter).max(0.001))
    }
}

#[derive(Debug)]
enum Circuit {
    Closed { failures: u32 },
    Open { until: Instant },
    Probing,
}

/// Stops calling a backend that keeps failing, then lets one probe through
/// once the cooldown has passed.
#[derive(Debug)]
struct Breaker {
    threshold: u32,
    cooldown: Duration,
    circuit: Mutex<Circuit>,
}

impl Breaker {
    fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            circuit: Mutex::new(Circuit::Closed { failures: 0 }),
        }
    }

    fn admit(&self) -> Result<(), GatewayError> {
        let mut circuit = self.circuit.lock();
        if let Circuit::Open { until } = *circuit {
            let now = Instant::now();
            if now < until {
                return Err(GatewayError::CircuitOpen(until - now));
            }
            *circuit = Circuit::Probing;
        }
        Ok(())
    }

    fn succeeded(&self) {
        let mut circuit = self.circuit.lock();
        if matches!(*circuit, Circuit::Probing | Circuit::Open { .. }) {
            info!("provider recovered, circuit closed");
        }
        *circuit = Circuit::Closed { failures: 0 };
    }

    fn failed(&self) {
        let mut circuit = self.circuit.lock();
        let failures = match *circuit {
            Circuit::Closed { failures } => failures + 1,
            Circuit::Probing => self.threshold,
            Circuit::Open { .. } => return,
        };
        *circuit = if failures >= self.threshold {
            warn!(failures, cooldown_ms = self.cooldown.as_millis() as u64, "circuit opened");
            Circuit::Open { until: Instant::now() + self.cooldown }
        } else {
            Circuit::Closed { failures }
        };
    }

    fn state_name(&self) -> &'static str {
        match *self.circuit.lock() {
            Circuit::Closed { .. } => "closed",
            Circuit::Open { .. } => "open",
            Circuit::Probing => "half_open",
        }
    }
}

/// An [`LlmProvider`] that retries transient failures and sheds load while
/// the backend is down.
///
/// Errors reported inside the stream before any content arrives are treated
/// like connect failures. Once a content event has been handed out the
/// stream is returned as is and later errors reach the caller.
pub struct ReliableProvider<P: LlmProvider> {
    inner: P,
    config: ReliableConfig,
    breaker: Breaker,
    total_retries: AtomicU64,
}

impl<P: LlmProvider> ReliableProvider<P> {
    pub fn new(inner: P, config: ReliableConfig) -> Self {
        let breaker = Breaker::new(config.circuit_breaker_threshold, config.circuit_breaker_cooldown);
        Self { inner, config, breaker, total_retries: AtomicU64::new(0) }
    }

    pub fn with_defaults(inner: P) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    pub fn circuit_state_name(&self) -> &'static str {
        self.breaker.state_name()
    }

    async fn open(&self, context: &LlmContext, options: &StreamOptions) -> Result<EventStream, GatewayError> {
        let mut stream = self.inner.stream(context, options).await?;
        let mut head = Vec::new();
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::Error { error } => return Err(error),
                StreamEvent::Start => head.push(event),
                content => {
                    head.push(content);
                    break;
                }
            }
        }
        Ok(Box::pin(futures::stream::iter(head).chain(stream)))
    }
}

#[async_trait]
impl<P: LlmProvider> LlmProvider for ReliableProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn supports_tools(&self) -> bool {
        self.inner.supports_tools()
    }

    async fn stream(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<EventStream, GatewayError> {
        let mut attempt = 0;
        loop {
            self.breaker.admit()?;
            let error = match self.open(context, options).await {
                Ok(stream) => {
                    self.breaker.succeeded();
                    return Ok(stream);
                }
                Err(error) => error,
            };
            if !error.is_retryable() || attempt == self.config.max_retries {
                self.breaker.failed();
                return Err(error);
            }

            let wait = self.config.backoff(attempt, error.suggested_delay());
            self.total_retries.fetch_add(1, Ordering::Relaxed);
            warn!(
                provider = self.inner.name(),
                attempt = attempt + 1,
                kind = error.error_kind(),
                wait_ms = wait.as_millis() as u64,
                "model call failed, retrying"
            );
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockProvider, MockResponse};

    fn quick() -> ReliableConfig {
        ReliableConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..Default::default()
        }
    }

    fn server_error() -> MockResponse {
        MockResponse::Error(GatewayError::ServerError { status: 500, body: "internal".into() })
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let mock = MockProvider::new(vec![
            server_error(),
            server_error(),
            MockResponse::stream_text("recovered"),
        ]);
        let reliable = ReliableProvider::new(mock, quick());

        let result = reliable.stream(&LlmContext::empty(), &StreamOptions::default()).await;
        assert!(result.is_ok());
        assert_eq!(reliable.total_retries(), 2);
        assert_eq!(reliable.inner().call_count(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_three_attempts() {
        let mock = MockProvider::new(vec![server_error(), server_error(), server_error(), server_error()]);
        let reliable = ReliableProvider::new(mock, quick());

        let result = reliable.stream(&LlmContext::empty(), &StreamOptions::default()).await;
        assert!(matches!(result, Err(GatewayError::ServerError { .. })));
        assert_eq!(reliable.inner().call_count(), 3);
        assert_eq!(reliable.inner().remaining(), 1);
    }

    #[tokio::test]
    async fn overload_reported_in_stream_is_retried() {
        let mock = MockProvider::new(vec![
            MockResponse::stream_error(GatewayError::ProviderOverloaded),
            MockResponse::stream_text("second try"),
        ]);
        let reliable = ReliableProvider::new(mock, quick());

        let stream = reliable
            .stream(&LlmContext::empty(), &StreamOptions::default())
            .await
            .unwrap();
        let events: Vec<StreamEvent> = stream.collect().await;
        assert!(matches!(events.first(), Some(StreamEvent::Start)));
        assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
        assert_eq!(reliable.total_retries(), 1);
    }

    #[tokio::test]
    async fn bad_credentials_fail_immediately() {
        let mock = MockProvider::new(vec![
            MockResponse::Error(GatewayError::AuthenticationFailed("bad key".into())),
            MockResponse::stream_text("unreachable"),
        ]);
        let reliable = ReliableProvider::new(mock, quick());

        let result = reliable.stream(&LlmContext::empty(), &StreamOptions::default()).await;
        assert!(matches!(result, Err(GatewayError::AuthenticationFailed(_))));
        assert_eq!(reliable.total_retries(), 0);
        assert_eq!(reliable.inner().remaining(), 1);
    }

    #[tokio::test]
    async fn breaker_opens_then_recovers_after_cooldown() {
        let mock = MockProvider::new(vec![
            server_error(),
            server_error(),
            server_error(),
            MockResponse::stream_text("recovered"),
        ]);
        let config = ReliableConfig {
            max_retries: 0,
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown: Duration::from_millis(50),
            ..quick()
        };
        let reliable = ReliableProvider::new(mock, config);
        let context = LlmContext::empty();

        for _ in 0..3 {
            let _ = reliable.stream(&context, &StreamOptions::default()).await;
        }
        assert_eq!(reliable.circuit_state_name(), "open");

        let shed = reliable.stream(&context, &StreamOptions::default()).await;
        assert!(matches!(shed, Err(GatewayError::CircuitOpen(_))));
        assert_eq!(reliable.inner().call_count(), 3);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(reliable.stream(&context, &StreamOptions::default()).await.is_ok());
        assert_eq!(reliable.circuit_state_name(), "closed");
    }

    #[test]
    fn failed_probe_reopens_the_circuit() {
        let breaker = Breaker::new(2, Duration::ZERO);
        breaker.failed();
        assert_eq!(breaker.state_name(), "closed");
        breaker.failed();
        assert_eq!(breaker.state_name(), "open");

        assert!(breaker.admit().is_ok());
        assert_eq!(breaker.state_name(), "half_open");
        breaker.failed();
        assert_eq!(breaker.state_name(), "open");
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let config = ReliableConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            jitter_factor: 0.0,
            ..Default::default()
        };
        assert_eq!(config.backoff(0, None).as_millis(), 100);
        assert_eq!(config.backoff(1, None).as_millis(), 200);
        assert_eq!(config.backoff(5, None).as_millis(), 300);
        assert_eq!(config.backoff(0, Some(Duration::from_secs(5))), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_the_factor() {
        let config = ReliableConfig {
            base_delay: Duration::from_millis(1000),
            jitter_factor: 0.2,
            ..Default::default()
        };
        for _ in 0..50 {
            let ms = config.backoff(0, None).as_millis();
            assert!((800..=1200).contains(&ms), "got {ms}");
        }
    }
}
