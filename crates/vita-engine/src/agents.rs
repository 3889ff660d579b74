//! Agent definitions and the startup-validated agent registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use vita_core::session::SessionContext;

use crate::guardrails::GuardrailSpec;
use crate::handoff::transfer_tool_name;
use crate::registry::ToolRegistry;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate agent: {0}")]
    DuplicateAgent(String),
    #[error("duplicate tool: {0}")]
    DuplicateTool(String),
    #[error("entry agent '{0}' is not registered")]
    UnknownEntry(String),
    #[error("agent '{agent}' hands off to unregistered agent '{target}'")]
    UnknownHandoffTarget { agent: String, target: String },
    #[error("agent '{agent}' lists unregistered tool '{tool}'")]
    UnknownTool { agent: String, tool: String },
    #[error("tool name '{0}' collides with a handoff tool")]
    ReservedToolName(String),
}

type InstructionFn = dyn Fn(&SessionContext) -> String + Send + Sync;

/// System instructions, either fixed or derived from the session on every call.
#[derive(Clone)]
pub enum Instructions {
    Static(String),
    Dynamic(Arc<InstructionFn>),
}

impl Instructions {
    pub fn dynamic(f: impl Fn(&SessionContext) -> String + Send + Sync + 'static) -> Self {
        Self::Dynamic(Arc::new(f))
    }

    pub fn resolve(&self, session: &SessionContext) -> String {
        match self {
            Self::Static(text) => text.clone(),
            Self::Dynamic(f) => f(session),
        }
    }
}

impl fmt::Debug for Instructions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(text) => f.debug_tuple("Static").field(&text.len()).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic"),
        }
    }
}

impl From<&str> for Instructions {
    fn from(text: &str) -> Self {
        Self::Static(text.to_string())
    }
}

impl From<String> for Instructions {
    fn from(text: String) -> Self {
        Self::Static(text)
    }
}

#[derive(Clone, Debug)]
pub struct AgentDefinition {
    pub name: String,
    pub instructions: Instructions,
    pub tools: Vec<String>,
    pub input_guardrails: Vec<Arc<GuardrailSpec>>,
    pub output_guardrails: Vec<Arc<GuardrailSpec>>,
    pub handoff_targets: Vec<String>,
    /// Shown to other agents in the description of this agent's transfer tool.
    pub handoff_description: String,
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>, instructions: impl Into<Instructions>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            tools: Vec::new(),
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
            handoff_targets: Vec::new(),
            handoff_description: String::new(),
        }
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools.extend(tools.into_iter().map(Into::into));
        self
    }

    pub fn with_input_guardrail(mut self, spec: Arc<GuardrailSpec>) -> Self {
        self.input_guardrails.push(spec);
        self
    }

    pub fn with_output_guardrail(mut self, spec: Arc<GuardrailSpec>) -> Self {
        self.output_guardrails.push(spec);
        self
    }

    pub fn with_handoffs<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.handoff_targets.extend(targets.into_iter().map(Into::into));
        self
    }

    pub fn with_handoff_description(mut self, description: impl Into<String>) -> Self {
        self.handoff_description = description.into();
        self
    }

    pub fn can_hand_off_to(&self, agent: &str) -> bool {
        self.handoff_targets.iter().any(|t| t == agent)
    }
}

/// All agents known to the process. Immutable once built.
#[derive(Debug)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<AgentDefinition>>,
    by_transfer_tool: HashMap<String, String>,
    entry: Arc<AgentDefinition>,
}

impl AgentRegistry {
    /// Validate and freeze the agent set.
    ///
    /// Every handoff target and tool must resolve, and `entry` must be one of
    /// the agents.
    pub fn new(
        entry: &str,
        agents: Vec<AgentDefinition>,
        tools: &ToolRegistry,
    ) -> Result<Self, RegistryError> {
        let mut map: HashMap<String, Arc<AgentDefinition>> = HashMap::new();
        for agent in agents {
            if map.contains_key(&agent.name) {
                return Err(RegistryError::DuplicateAgent(agent.name));
            }
            map.insert(agent.name.clone(), Arc::new(agent));
        }

        let mut by_transfer_tool = HashMap::new();
        for name in map.keys() {
            let tool = transfer_tool_name(name);
            if tools.contains(&tool) {
                return Err(RegistryError::ReservedToolName(tool));
            }
            if by_transfer_tool.insert(tool.clone(), name.clone()).is_some() {
                return Err(RegistryError::ReservedToolName(tool));
            }
        }

        for agent in map.values() {
            if let Some(target) = agent.handoff_targets.iter().find(|t| !map.contains_key(*t)) {
                return Err(RegistryError::UnknownHandoffTarget {
                    agent: agent.name.clone(),
                    target: target.clone(),
                });
            }
            if let Some(tool) = agent.tools.iter().find(|t| !tools.contains(t)) {
                return Err(RegistryError::UnknownTool {
                    agent: agent.name.clone(),
                    tool: tool.clone(),
                });
            }
        }

        let entry = map
            .get(entry)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownEntry(entry.to_string()))?;

        Ok(Self { agents: map, by_transfer_tool, entry })
    }

    pub fn get(&self, name: &str) -> Option<Arc<AgentDefinition>> {
        self.agents.get(name).cloned()
    }

    pub fn entry(&self) -> &Arc<AgentDefinition> {
        &self.entry
    }

    /// The agent whose transfer tool is named `tool`, if any.
    pub fn by_transfer_tool(&self, tool: &str) -> Option<Arc<AgentDefinition>> {
        self.by_transfer_tool.get(tool).and_then(|name| self.get(name))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triage() -> AgentDefinition {
        AgentDefinition::new("Triage", "Route the user.").with_handoffs(["Specialist"])
    }

    fn specialist() -> AgentDefinition {
        AgentDefinition::new("Specialist", "Help.")
            .with_handoff_description("Handles specialist questions")
    }

    #[test]
    fn dynamic_instructions_see_session() {
        let instructions = Instructions::dynamic(|s| format!("The user is {}.", s.name()));
        let session = SessionContext::new("Ada", "u1");
        assert_eq!(instructions.resolve(&session), "The user is Ada.");
    }

    #[test]
    fn valid_registry_resolves_entry_and_transfers() {
        let reg = AgentRegistry::new("Triage", vec![triage(), specialist()], &ToolRegistry::new()).unwrap();
        assert_eq!(reg.entry().name, "Triage");
        assert_eq!(reg.by_transfer_tool("transfer_to_specialist").unwrap().name, "Specialist");
        assert!(reg.by_transfer_tool("transfer_to_nobody").is_none());
        assert_eq!(reg.names(), vec!["Specialist", "Triage"]);
    }

    #[test]
    fn unknown_handoff_target_rejected() {
        let err = AgentRegistry::new("Triage", vec![triage()], &ToolRegistry::new()).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownHandoffTarget { ref target, .. } if target == "Specialist"));
    }

    #[test]
    fn unknown_entry_and_tools_rejected() {
        let err = AgentRegistry::new("Nobody", vec![specialist()], &ToolRegistry::new()).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownEntry(_)));

        let with_tool = specialist().with_tools(["meal_planner"]);
        let err = AgentRegistry::new("Specialist", vec![with_tool], &ToolRegistry::new()).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownTool { ref tool, .. } if tool == "meal_planner"));
    }

    #[test]
    fn duplicate_agents_rejected() {
        let err = AgentRegistry::new("Specialist", vec![specialist(), specialist()], &ToolRegistry::new())
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateAgent(_)));
    }
}
