//! Health and wellness coaching on top of the vita engine.
//!
//! [`build_orchestrator`] wires the wellness agents, their guardrails and the
//! tool set into an [`Orchestrator`] ready to back a `SessionManager`.

pub mod agents;
pub mod guardrails;
pub mod tools;

use std::sync::Arc;

use tracing::info;

use vita_core::provider::LlmProvider;
use vita_engine::agents::{AgentRegistry, RegistryError};
use vita_engine::runner::{Orchestrator, OrchestratorConfig};
use vita_settings::VitaSettings;

pub use agents::{wellness_agents, ESCALATION, INJURY_SUPPORT, NUTRITION_EXPERT, PLANNER};
pub use guardrails::WellnessGuardrails;
pub use tools::{create_wellness_registry, ToolDeps};

/// Validate the agent graph against the tool set and build the orchestrator.
pub fn build_orchestrator(
    provider: Arc<dyn LlmProvider>,
    settings: &VitaSettings,
) -> Result<Orchestrator, RegistryError> {
    let specs = WellnessGuardrails::new();
    let agents = wellness_agents(&specs);
    let tools = create_wellness_registry(&ToolDeps::from_settings(Arc::clone(&provider), specs, settings))?;
    let registry = AgentRegistry::new(PLANNER, agents, &tools)?;
    info!(agents = registry.len(), tools = tools.names().len(), "wellness orchestrator ready");

    Ok(Orchestrator::new(
        provider,
        Arc::new(registry),
        Arc::new(tools),
        OrchestratorConfig::from_settings(settings),
    ))
}
