//! Shared vocabulary for the vita runtime: conversation items, provider and
//! tool contracts, per-session state, guardrail outcomes and lifecycle hooks.

pub mod context;
pub mod errors;
pub mod guardrails;
pub mod hooks;
pub mod ids;
pub mod messages;
pub mod provider;
pub mod session;
pub mod stream;
pub mod tokens;
pub mod tools;

pub use context::{LlmContext, OutputSchema};
pub use errors::{FailureClass, GatewayError};
pub use guardrails::{GuardrailRejection, GuardrailResult, GuardrailStage};
pub use hooks::{HookContext, HookType, RunHooks};
pub use ids::{SessionId, ToolCallId};
pub use messages::{AssistantContent, AssistantMessage, Message, StopReason, ToolCallBlock};
pub use provider::{LlmProvider, StreamOptions};
pub use session::SessionContext;
pub use stream::StreamEvent;
pub use tokens::TokenUsage;
pub use tools::{Tool, ToolContext, ToolDefinition, ToolError, ToolResult};
