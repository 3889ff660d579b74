use std::collections::btree_map::{BTreeMap, Entry};
use std::sync::Arc;

use tracing::debug;
use vita_core::tools::{Tool, ToolDefinition};

use crate::agents::RegistryError;

/// Every tool the agents may be granted, keyed by name.
///
/// Filled once while the orchestrator is wired, then shared read-only.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        match self.tools.entry(tool.name().to_owned()) {
            Entry::Occupied(taken) => Err(RegistryError::DuplicateTool(taken.key().clone())),
            Entry::Vacant(slot) => {
                debug!(tool = %slot.key(), "tool registered");
                slot.insert(tool);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered names in lexical order.
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Declarations for an agent's tool list, in that list's order.
    /// Names with no registered tool are skipped.
    pub fn definitions_for(&self, names: &[String]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.to_definition())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }
}
