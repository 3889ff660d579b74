//! Guardrail specifications and their evaluation.
//!
//! A [`GuardrailSpec`] is a classification call: fixed instructions, a
//! structured output schema, and a [`TripwirePolicy`] that turns the
//! classifier's verdict into pass or reject.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use vita_core::context::{LlmContext, OutputSchema};
use vita_core::guardrails::GuardrailResult;
use vita_core::provider::LlmProvider;
use vita_settings::GuardrailMode;

use crate::error::EngineError;
use crate::structured::{run_structured, StructuredError};

/// How a classifier verdict becomes a decision.
#[derive(Clone, Debug, PartialEq)]
pub enum TripwirePolicy {
    /// Reject when the boolean `field` is false.
    RequireTrue { field: String },
    /// Reject only when `flag` is false, `category_field` equals `category`
    /// and `confidence_field` exceeds `threshold`.
    RejectCategory {
        flag: String,
        category_field: String,
        category: String,
        confidence_field: String,
        threshold: f64,
    },
    /// Never reject; the verdict only has to parse.
    Observe,
}

#[derive(Clone, Debug)]
pub struct GuardrailSpec {
    pub name: String,
    pub instructions: String,
    pub output: OutputSchema,
    pub policy: TripwirePolicy,
}

impl GuardrailSpec {
    pub fn new(
        name: impl Into<String>,
        instructions: impl Into<String>,
        output: OutputSchema,
        policy: TripwirePolicy,
    ) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            output,
            policy,
        }
    }

    /// Apply the policy to a parsed verdict. A verdict missing a field the
    /// policy needs is an error, not a rejection.
    pub fn decide(&self, verdict: &Value) -> Result<GuardrailResult, String> {
        if !verdict.is_object() {
            return Err("verdict is not a JSON object".into());
        }
        let reasoning = verdict
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let passed = match &self.policy {
            TripwirePolicy::RequireTrue { field } => bool_field(verdict, field)?,
            TripwirePolicy::RejectCategory {
                flag,
                category_field,
                category,
                confidence_field,
                threshold,
            } => {
                let ok = bool_field(verdict, flag)?;
                let cat = verdict.get(category_field).and_then(Value::as_str);
                let confidence = verdict.get(confidence_field).and_then(Value::as_f64).unwrap_or(0.0);
                ok || cat != Some(category.as_str()) || confidence <= *threshold
            }
            TripwirePolicy::Observe => true,
        };

        let mut result = if passed {
            GuardrailResult::pass(reasoning)
        } else {
            GuardrailResult::reject(&self.name, reasoning)
        };
        if let TripwirePolicy::RejectCategory { category_field, confidence_field, .. } = &self.policy {
            result.category = verdict.get(category_field).and_then(Value::as_str).map(String::from);
            result.confidence = verdict.get(confidence_field).and_then(Value::as_f64);
        }
        Ok(result)
    }
}

fn bool_field(verdict: &Value, field: &str) -> Result<bool, String> {
    verdict
        .get(field)
        .and_then(Value::as_bool)
        .ok_or_else(|| format!("verdict lacks boolean field '{field}'"))
}

/// Runs guardrail specs through the inference capability.
pub struct GuardrailEngine {
    provider: Arc<dyn LlmProvider>,
    mode: GuardrailMode,
    attempts: u32,
}

impl GuardrailEngine {
    pub fn new(provider: Arc<dyn LlmProvider>, mode: GuardrailMode, attempts: u32) -> Self {
        Self {
            provider,
            mode,
            attempts: attempts.max(1),
        }
    }

    /// Evaluate `specs` in declared order against `text`.
    ///
    /// Returns the first rejection, or a pass when every check passes.
    /// Concurrent mode launches all checks at once but reports exactly what
    /// sequential evaluation would have.
    #[instrument(skip_all, fields(checks = specs.len(), mode = ?self.mode))]
    pub async fn evaluate(
        &self,
        specs: &[Arc<GuardrailSpec>],
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<GuardrailResult, EngineError> {
        match self.mode {
            GuardrailMode::Sequential => {
                for spec in specs {
                    let result = self.check(spec, text, cancel).await?;
                    if !result.passed {
                        return Ok(result);
                    }
                }
            }
            GuardrailMode::Concurrent => {
                let results = join_all(specs.iter().map(|spec| self.check(spec, text, cancel))).await;
                for result in results {
                    let result = result?;
                    if !result.passed {
                        return Ok(result);
                    }
                }
            }
        }
        Ok(GuardrailResult::pass("all guardrails passed"))
    }

    #[instrument(skip_all, fields(guardrail = %spec.name))]
    async fn check(
        &self,
        spec: &GuardrailSpec,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<GuardrailResult, EngineError> {
        let ctx = LlmContext::structured(spec.instructions.clone(), text, spec.output.clone());
        let mut last_failure = String::new();

        for attempt in 1..=self.attempts {
            let outcome = match run_structured(self.provider.as_ref(), &ctx, cancel).await {
                Ok(verdict) => spec.decide(&verdict),
                Err(StructuredError::Cancelled) => return Err(EngineError::Aborted),
                Err(e) => Err(e.to_string()),
            };
            match outcome {
                Ok(result) => {
                    debug!(passed = result.passed, "guardrail evaluated");
                    return Ok(result);
                }
                Err(reason) => {
                    warn!(attempt, reason = %reason, "guardrail check failed");
                    last_failure = reason;
                }
            }
        }

        Err(EngineError::GuardrailCheck {
            guardrail: spec.name.clone(),
            reason: last_failure,
        })
    }
}
