use serde::{Deserialize, Serialize};

pub const INPUT_REJECTION_MESSAGE: &str = "I need a bit more information to help you properly. \
Could you please rephrase your question to focus on health, fitness, nutrition, or wellness topics? \
For example, you could ask about workout plans, meal planning, setting fitness goals, or health advice.";

pub const OUTPUT_REJECTION_MESSAGE: &str = "I need to review my response to ensure it meets our \
quality standards. Please give me a moment to provide you with better information.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailStage {
    Input,
    Output,
}

impl GuardrailStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

/// Outcome of running a set of guardrail checks over one piece of text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GuardrailResult {
    pub passed: bool,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// The check that decided a rejection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guardrail: Option<String>,
}

impl GuardrailResult {
    pub fn pass(reasoning: impl Into<String>) -> Self {
        Self {
            passed: true,
            reasoning: reasoning.into(),
            category: None,
            confidence: None,
            guardrail: None,
        }
    }

    pub fn reject(guardrail: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            passed: false,
            reasoning: reasoning.into(),
            category: None,
            confidence: None,
            guardrail: Some(guardrail.into()),
        }
    }
}

/// A turn ended because a guardrail tripped. Not an error: the caller shows
/// [`GuardrailRejection::user_message`] and the conversation continues.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GuardrailRejection {
    pub stage: GuardrailStage,
    pub agent: String,
    pub guardrail: String,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl GuardrailRejection {
    pub fn from_result(stage: GuardrailStage, agent: &str, result: GuardrailResult) -> Self {
        Self {
            stage,
            agent: agent.to_string(),
            guardrail: result.guardrail.unwrap_or_else(|| "unknown".into()),
            reasoning: result.reasoning,
            category: result.category,
            confidence: result.confidence,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self.stage {
            GuardrailStage::Input => INPUT_REJECTION_MESSAGE,
            GuardrailStage::Output => OUTPUT_REJECTION_MESSAGE,
        }
    }
}
