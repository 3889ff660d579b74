use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::session::SessionSummary;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub max: f64,
}

impl HistogramSummary {
    fn of(samples: &[f64]) -> Self {
        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);
        let Some(&max) = sorted.last() else {
            return Self::default();
        };
        let rank = |q: f64| sorted[((sorted.len() as f64 * q) as usize).min(sorted.len() - 1)];
        Self {
            count: sorted.len() as u64,
            sum: sorted.iter().sum(),
            p50: rank(0.5),
            p95: rank(0.95),
            max,
        }
    }
}

/// `name{k=v,...}` with labels in key order, so label order at the call site
/// does not matter.
fn metric_key(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return name.to_owned();
    }
    let mut labels = labels.to_vec();
    labels.sort_unstable();
    let rendered: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{name}{{{}}}", rendered.join(","))
}

/// Point-in-time view of the process-wide aggregates.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OperatorSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub histograms: BTreeMap<String, HistogramSummary>,
}

#[derive(Default)]
struct Aggregates {
    counters: BTreeMap<String, u64>,
    samples: BTreeMap<String, Vec<f64>>,
}

/// Process-wide aggregates across sessions.
///
/// Fed only by closed-session summaries, so sessions never share mutable
/// telemetry state while they run.
#[derive(Default)]
pub struct OperatorMetrics {
    inner: Mutex<Aggregates>,
}

impl OperatorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter_inc(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        *self.inner.lock().counters.entry(metric_key(name, labels)).or_default() += n;
    }

    pub fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.inner.lock().samples.entry(metric_key(name, labels)).or_default().push(value);
    }

    pub fn counter_get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.inner.lock().counters.get(&metric_key(name, labels)).copied().unwrap_or(0)
    }

    pub fn histogram_summary(&self, name: &str, labels: &[(&str, &str)]) -> HistogramSummary {
        self.inner
            .lock()
            .samples
            .get(&metric_key(name, labels))
            .map(|samples| HistogramSummary::of(samples))
            .unwrap_or_default()
    }

    /// Fold one closed session into the aggregates.
    pub fn record_session(&self, summary: &SessionSummary) {
        self.counter_inc("sessions.closed", &[], 1);
        self.counter_inc("events.total", &[], summary.total_events);
        self.counter_inc("errors.total", &[], summary.error_count as u64);
        for (agent, perf) in &summary.agent_performance {
            self.counter_inc("agent.starts", &[("agent", agent)], perf.start_count);
            self.counter_inc("agent.tokens", &[("agent", agent)], perf.total_tokens);
        }
        for (tool, count) in &summary.tool_usage {
            self.counter_inc("tool.calls", &[("tool", tool)], *count);
        }
        for handoff in &summary.handoff_history {
            self.counter_inc(
                "handoffs.total",
                &[("from", &handoff.from_agent), ("to", &handoff.to_agent)],
                1,
            );
        }
        self.histogram_observe("session.duration_seconds", &[], summary.session_duration_seconds);
        self.histogram_observe("session.tokens", &[], summary.total_tokens() as f64);
    }

    pub fn snapshot(&self) -> OperatorSnapshot {
        let inner = self.inner.lock();
        OperatorSnapshot {
            counters: inner.counters.clone(),
            histograms: inner
                .samples
                .iter()
                .map(|(key, samples)| (key.clone(), HistogramSummary::of(samples)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{AgentPerformance, HandoffRecord};

    fn summary(duration: f64, tokens: u64) -> SessionSummary {
        let mut agent_performance = BTreeMap::new();
        agent_performance.insert(
            "Health Wellness Planner Agent".to_string(),
            AgentPerformance { start_count: 2, total_tokens: tokens, last_used: None },
        );
        let mut tool_usage = BTreeMap::new();
        tool_usage.insert("meal_planner".to_string(), 3);
        SessionSummary {
            session_duration_seconds: duration,
            total_events: 9,
            agent_performance,
            tool_usage,
            handoff_history: vec![HandoffRecord {
                timestamp: "t".into(),
                from_agent: "Health Wellness Planner Agent".into(),
                to_agent: "InjurySupportAgent".into(),
                user_name: "Sam".into(),
                total_tokens: 0,
            }],
            error_count: 1,
            errors: None,
        }
    }

    #[test]
    fn folds_session_summaries() {
        let m = OperatorMetrics::new();
        m.record_session(&summary(10.0, 100));
        m.record_session(&summary(30.0, 300));

        assert_eq!(m.counter_get("sessions.closed", &[]), 2);
        assert_eq!(m.counter_get("events.total", &[]), 18);
        assert_eq!(m.counter_get("errors.total", &[]), 2);
        assert_eq!(m.counter_get("tool.calls", &[("tool", "meal_planner")]), 6);
        assert_eq!(
            m.counter_get(
                "handoffs.total",
                &[("to", "InjurySupportAgent"), ("from", "Health Wellness Planner Agent")]
            ),
            2
        );
        let durations = m.histogram_summary("session.duration_seconds", &[]);
        assert_eq!(durations.count, 2);
        assert_eq!(durations.sum, 40.0);
        assert_eq!(durations.max, 30.0);
    }

    #[test]
    fn snapshot_renders_labels() {
        let m = OperatorMetrics::new();
        m.counter_inc("tool.calls", &[("tool", "get_current_time")], 4);
        let snap = m.snapshot();
        assert_eq!(snap.counters["tool.calls{tool=get_current_time}"], 4);
        assert!(snap.histograms.is_empty());
    }

    #[test]
    fn percentiles_come_from_sorted_samples() {
        let m = OperatorMetrics::new();
        for tokens in [400.0, 100.0, 300.0, 200.0] {
            m.histogram_observe("session.tokens", &[], tokens);
        }
        let tokens = m.histogram_summary("session.tokens", &[]);
        assert_eq!(tokens.p50, 300.0);
        assert_eq!(tokens.p95, 400.0);
        assert_eq!(tokens.max, 400.0);
        assert_eq!(m.histogram_summary("missing", &[]), HistogramSummary::default());
    }
}
