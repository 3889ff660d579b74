use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use vita_core::guardrails::GuardrailRejection;
use vita_core::hooks::{HookContext, RunHooks};
use vita_core::tokens::TokenUsage;

const OBSERVER_COOLDOWN: Duration = Duration::from_secs(60);

/// Circuit breaker state for one observer.
struct CircuitBreaker {
    failures: AtomicU32,
    threshold: u32,
    last_trip: Mutex<Option<Instant>>,
    cooldown: Duration,
}

impl CircuitBreaker {
    fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            failures: AtomicU32::new(0),
            threshold: threshold.max(1),
            last_trip: Mutex::new(None),
            cooldown,
        }
    }

    fn is_open(&self) -> bool {
        if self.failures.load(Ordering::Relaxed) < self.threshold {
            return false;
        }
        self.last_trip
            .lock()
            .is_some_and(|tripped_at| tripped_at.elapsed() < self.cooldown)
    }

    fn record_failure(&self, observer: usize) {
        let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.threshold {
            let mut last_trip = self.last_trip.lock();
            if last_trip.is_none() {
                warn!(
                    observer,
                    failures,
                    threshold = self.threshold,
                    cooldown_secs = self.cooldown.as_secs(),
                    "observer circuit breaker tripped"
                );
            }
            *last_trip = Some(Instant::now());
        }
    }

    fn record_success(&self) {
        if self.failures.swap(0, Ordering::Relaxed) > 0 {
            *self.last_trip.lock() = None;
        }
    }
}

struct ObserverEntry {
    observer: Arc<dyn RunHooks>,
    breaker: CircuitBreaker,
}

/// Fans lifecycle callbacks out to the session's observers.
///
/// Observers never fail a turn: a panicking callback is caught, reported to
/// the other observers through `on_error`, and counted against that
/// observer's circuit breaker. A tripped observer is skipped until its
/// cooldown elapses.
pub struct HookDispatcher {
    entries: Vec<ObserverEntry>,
}

impl HookDispatcher {
    pub fn new(observers: Vec<Arc<dyn RunHooks>>, failure_threshold: u32) -> Self {
        let entries = observers
            .into_iter()
            .map(|observer| ObserverEntry {
                observer,
                breaker: CircuitBreaker::new(failure_threshold, OBSERVER_COOLDOWN),
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn agent_start(&self, ctx: &HookContext<'_>, agent: &str) {
        self.dispatch("on_agent_start", ctx, |o| o.on_agent_start(ctx, agent));
    }

    pub fn agent_end(&self, ctx: &HookContext<'_>, agent: &str, output: &str, usage: TokenUsage) {
        self.dispatch("on_agent_end", ctx, |o| o.on_agent_end(ctx, agent, output, usage));
    }

    pub fn tool_start(&self, ctx: &HookContext<'_>, agent: &str, tool: &str) {
        self.dispatch("on_tool_start", ctx, |o| o.on_tool_start(ctx, agent, tool));
    }

    pub fn tool_end(&self, ctx: &HookContext<'_>, agent: &str, tool: &str, result: &str, is_error: bool) {
        self.dispatch("on_tool_end", ctx, |o| o.on_tool_end(ctx, agent, tool, result, is_error));
    }

    pub fn handoff(&self, ctx: &HookContext<'_>, from: &str, to: &str) {
        self.dispatch("on_handoff", ctx, |o| o.on_handoff(ctx, from, to));
    }

    pub fn guardrail_violation(&self, ctx: &HookContext<'_>, rejection: &GuardrailRejection) {
        self.dispatch("on_guardrail_violation", ctx, |o| o.on_guardrail_violation(ctx, rejection));
    }

    pub fn error(&self, ctx: &HookContext<'_>, method: &str, err: &str) {
        self.dispatch("on_error", ctx, |o| o.on_error(ctx, method, err));
    }

    fn dispatch(&self, method: &str, ctx: &HookContext<'_>, call: impl Fn(&dyn RunHooks)) {
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.breaker.is_open() {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| call(entry.observer.as_ref()))) {
                Ok(()) => entry.breaker.record_success(),
                Err(panic) => {
                    let msg = panic_message(&panic);
                    error!(observer = i, method, panic = %msg, "observer panicked");
                    entry.breaker.record_failure(i);
                    self.report_failure(i, ctx, method, &msg);
                }
            }
        }
    }

    /// Tell every other live observer that observer `failed` panicked.
    fn report_failure(&self, failed: usize, ctx: &HookContext<'_>, method: &str, msg: &str) {
        let detail = format!("observer panicked: {msg}");
        for (i, entry) in self.entries.iter().enumerate() {
            if i == failed || entry.breaker.is_open() {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| entry.observer.on_error(ctx, method, &detail))).is_err() {
                entry.breaker.record_failure(i);
            }
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}

/// Mirrors every lifecycle callback into the log.
pub struct TracingHooks;

impl RunHooks for TracingHooks {
    fn on_agent_start(&self, ctx: &HookContext<'_>, agent: &str) {
        info!(agent, user = ctx.session.uid(), "agent started");
    }

    fn on_agent_end(&self, ctx: &HookContext<'_>, agent: &str, output: &str, agent_usage: TokenUsage) {
        info!(
            agent,
            user = ctx.session.uid(),
            output_chars = output.chars().count(),
            agent_tokens = agent_usage.total(),
            turn_tokens = ctx.turn_usage.total(),
            "agent finished"
        );
    }

    fn on_tool_start(&self, _ctx: &HookContext<'_>, agent: &str, tool: &str) {
        debug!(agent, tool, "tool started");
    }

    fn on_tool_end(&self, _ctx: &HookContext<'_>, agent: &str, tool: &str, result: &str, is_error: bool) {
        if is_error {
            warn!(agent, tool, result = %result.chars().take(200).collect::<String>(), "tool failed");
        } else {
            debug!(agent, tool, result_chars = result.chars().count(), "tool finished");
        }
    }

    fn on_handoff(&self, ctx: &HookContext<'_>, from: &str, to: &str) {
        info!(from, to, user = ctx.session.uid(), "agent handoff");
    }

    fn on_guardrail_violation(&self, _ctx: &HookContext<'_>, rejection: &GuardrailRejection) {
        warn!(
            agent = %rejection.agent,
            stage = rejection.stage.as_str(),
            guardrail = %rejection.guardrail,
            reasoning = %rejection.reasoning,
            "guardrail tripped"
        );
    }

    fn on_error(&self, _ctx: &HookContext<'_>, method: &str, error: &str) {
        error!(method, error, "runtime error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use vita_core::session::SessionContext;

    #[derive(Default)]
    struct Recorder {
        starts: AtomicUsize,
        errors: Mutex<Vec<(String, String)>>,
    }

    impl RunHooks for Recorder {
        fn on_agent_start(&self, _ctx: &HookContext<'_>, _agent: &str) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        fn on_error(&self, _ctx: &HookContext<'_>, method: &str, error: &str) {
            self.errors.lock().push((method.to_string(), error.to_string()));
        }
    }

    struct Exploding {
        calls: AtomicUsize,
    }

    impl RunHooks for Exploding {
        fn on_agent_start(&self, _ctx: &HookContext<'_>, _agent: &str) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            panic!("observer bug");
        }
    }

    fn ctx(session: &SessionContext) -> HookContext<'_> {
        HookContext { session, turn_usage: TokenUsage::default() }
    }

    #[test]
    fn panics_become_error_records() {
        let recorder = Arc::new(Recorder::default());
        let exploding = Arc::new(Exploding { calls: AtomicUsize::new(0) });
        let observers: Vec<Arc<dyn RunHooks>> = vec![exploding.clone(), recorder.clone()];
        let hooks = HookDispatcher::new(observers, 3);
        let session = SessionContext::new("Ada", "1");

        hooks.agent_start(&ctx(&session), "Planner");

        assert_eq!(recorder.starts.load(Ordering::SeqCst), 1);
        let errors = recorder.errors.lock();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "on_agent_start");
        assert!(errors[0].1.contains("observer bug"));
    }

    #[test]
    fn breaker_skips_repeat_offender() {
        let recorder = Arc::new(Recorder::default());
        let exploding = Arc::new(Exploding { calls: AtomicUsize::new(0) });
        let observers: Vec<Arc<dyn RunHooks>> = vec![exploding.clone(), recorder.clone()];
        let hooks = HookDispatcher::new(observers, 2);
        let session = SessionContext::new("Ada", "1");

        for _ in 0..5 {
            hooks.agent_start(&ctx(&session), "Planner");
        }

        assert_eq!(exploding.calls.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.starts.load(Ordering::SeqCst), 5);
        assert_eq!(recorder.errors.lock().len(), 2);
    }

    #[test]
    fn tracing_hooks_are_infallible() {
        let observer: Arc<dyn RunHooks> = Arc::new(TracingHooks);
        let hooks = HookDispatcher::new(vec![observer], 3);
        let session = SessionContext::new("Ada", "1");
        hooks.agent_start(&ctx(&session), "Planner");
        hooks.tool_end(&ctx(&session), "Planner", "meal_planner", "[error] boom", true);
        hooks.error(&ctx(&session), "run_turn", "provider down");
    }
}
