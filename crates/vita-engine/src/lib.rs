//! Turn execution for the vita runtime.
//!
//! [`Orchestrator`] runs one conversation turn: input guardrails, inference
//! and tool rounds, handoffs between agents, output guardrails. [`Session`]
//! wraps it with per-conversation state, single-turn admission and streaming.

// ToolInvoker and HookDispatcher contain panics with catch_unwind.
#[cfg(panic = "abort")]
compile_error!("vita-engine requires panic = \"unwind\"; tool and observer panics must not end the process");

pub mod agents;
pub mod emitter;
pub mod error;
pub mod guardrails;
pub mod handoff;
pub mod hooks;
pub mod invoker;
pub mod registry;
pub mod runner;
pub mod schema;
pub mod session;
pub mod structured;
pub mod truncate;

pub use agents::{AgentDefinition, AgentRegistry, Instructions, RegistryError};
pub use emitter::{FragmentSink, TurnStream};
pub use error::EngineError;
pub use guardrails::{GuardrailEngine, GuardrailSpec, TripwirePolicy};
pub use handoff::{transfer_tool_name, HandoffRouter};
pub use hooks::{HookDispatcher, TracingHooks};
pub use invoker::ToolInvoker;
pub use registry::ToolRegistry;
pub use runner::{Orchestrator, OrchestratorConfig, TurnOutcome, TurnReply, TurnRequest, TurnResult};
pub use session::{Session, SessionManager};
pub use structured::{run_structured, run_structured_as, StructuredError};
