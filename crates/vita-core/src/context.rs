use serde::{Deserialize, Serialize};

use crate::messages::Message;
use crate::tools::ToolDefinition;

/// Everything a provider needs for one inference call.
#[derive(Clone, Debug, Default)]
pub struct LlmContext {
    pub messages: Vec<Message>,
    pub instructions: String,
    pub tools: Vec<ToolDefinition>,
    /// When set, the provider must answer with a single JSON document matching the schema.
    pub output_schema: Option<OutputSchema>,
}

/// A named JSON schema requested as the structured output of a call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputSchema {
    pub name: String,
    pub schema: serde_json::Value,
}

impl LlmContext {
    /// Create an empty context (useful for testing).
    pub fn empty() -> Self {
        Self::default()
    }

    /// A tool-less, single-message call that must return JSON matching `schema`.
    pub fn structured(
        instructions: impl Into<String>,
        input: impl Into<String>,
        schema: OutputSchema,
    ) -> Self {
        Self {
            messages: vec![Message::user_text(input)],
            instructions: instructions.into(),
            tools: Vec::new(),
            output_schema: Some(schema),
        }
    }

    pub fn is_structured(&self) -> bool {
        self.output_schema.is_some()
    }
}
