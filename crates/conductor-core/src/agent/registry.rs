//! Agent registry - static catalog of agent definitions.
//!
//! Definitions are fixed at process start and validated once: every
//! spawnable child must exist and the spawn graph must be acyclic.
//! Runtime spawning additionally enforces a per-run depth counter.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Immutable descriptor of one agent type.
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub id: String,
    pub display_name: String,
    pub system_prompt: String,
    /// Built-in tool names this agent may invoke.
    pub tool_names: Vec<String>,
    /// Agent ids this agent may spawn. Empty for leaves.
    pub spawnable_agents: Vec<String>,
    /// Whether namespaced provider tools are added to this agent's
    /// tool set.
    pub use_provider_tools: bool,
}

impl AgentDefinition {
    pub fn can_spawn(&self, agent_id: &str) -> bool {
        self.spawnable_agents.iter().any(|id| id == agent_id)
    }

    pub fn allows_tool(&self, name: &str) -> bool {
        self.tool_names.iter().any(|n| n == name)
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Duplicate agent id: {0}")]
    DuplicateId(String),
    #[error("Agent '{parent}' lists unknown spawnable agent '{child}'")]
    UnknownChild { parent: String, child: String },
    #[error("Spawn graph contains a cycle through '{0}'")]
    SpawnCycle(String),
}

/// Static catalog of agent definitions, keyed by id.
#[derive(Debug)]
pub struct AgentRegistry {
    agents: HashMap<String, AgentDefinition>,
}

impl AgentRegistry {
    /// Build a registry from definitions, validating the spawn graph.
    pub fn new(definitions: Vec<AgentDefinition>) -> Result<Self, RegistryError> {
        let mut agents = HashMap::new();
        for def in definitions {
            if agents.contains_key(&def.id) {
                return Err(RegistryError::DuplicateId(def.id));
            }
            agents.insert(def.id.clone(), def);
        }

        validate_spawn_graph(&agents)?;
        Ok(Self { agents })
    }

    /// Registry with the built-in phase agents.
    pub fn builtin() -> Self {
        Self::new(builtin_definitions()).expect("built-in agent definitions are valid")
    }

    pub fn get(&self, id: &str) -> Option<&AgentDefinition> {
        self.agents.get(id)
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.agents.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

fn validate_spawn_graph(
    agents: &HashMap<String, AgentDefinition>,
) -> Result<(), RegistryError> {
    for def in agents.values() {
        for child in &def.spawnable_agents {
            if !agents.contains_key(child) {
                return Err(RegistryError::UnknownChild {
                    parent: def.id.clone(),
                    child: child.clone(),
                });
            }
        }
    }

    // DFS cycle check over the spawn graph.
    let mut visited: HashSet<&str> = HashSet::new();
    let mut in_stack: HashSet<&str> = HashSet::new();

    fn visit<'a>(
        id: &'a str,
        agents: &'a HashMap<String, AgentDefinition>,
        visited: &mut HashSet<&'a str>,
        in_stack: &mut HashSet<&'a str>,
    ) -> Result<(), RegistryError> {
        if in_stack.contains(id) {
            return Err(RegistryError::SpawnCycle(id.to_string()));
        }
        if !visited.insert(id) {
            return Ok(());
        }

        in_stack.insert(id);
        if let Some(def) = agents.get(id) {
            for child in &def.spawnable_agents {
                visit(child, agents, visited, in_stack)?;
            }
        }
        in_stack.remove(id);
        Ok(())
    }

    for id in agents.keys() {
        visit(id, agents, &mut visited, &mut in_stack)?;
    }

    Ok(())
}

const READ_ONLY_TOOLS: &[&str] = &["read", "list", "search"];

fn with_task_complete(tools: &[&str]) -> Vec<String> {
    tools
        .iter()
        .chain(std::iter::once(&"task_complete"))
        .map(|s| s.to_string())
        .collect()
}

fn builtin_definitions() -> Vec<AgentDefinition> {
    vec![
        AgentDefinition {
            id: "prediction".to_string(),
            display_name: "Prediction".to_string(),
            system_prompt: "Survey the workspace and the task. Produce a short list of focus \
                            areas, one per line, each starting with '- '. Do not make changes."
                .to_string(),
            tool_names: with_task_complete(READ_ONLY_TOOLS),
            spawnable_agents: Vec::new(),
            use_provider_tools: false,
        },
        AgentDefinition {
            id: "intelligence".to_string(),
            display_name: "Intelligence".to_string(),
            system_prompt: "Investigate your assigned focus area in depth. Report concrete \
                            findings with file references. Do not make changes."
                .to_string(),
            tool_names: with_task_complete(READ_ONLY_TOOLS),
            spawnable_agents: Vec::new(),
            use_provider_tools: false,
        },
        AgentDefinition {
            id: "synthesis".to_string(),
            display_name: "Synthesis".to_string(),
            system_prompt: "Combine the findings you are given into a single concrete plan of \
                            action. Spawn an intelligence agent if a finding needs deeper \
                            investigation. Be specific about files and commands."
                .to_string(),
            tool_names: with_task_complete(&["read", "list", "search", "spawn_agent"]),
            spawnable_agents: vec!["intelligence".to_string()],
            use_provider_tools: false,
        },
        AgentDefinition {
            id: "execution".to_string(),
            display_name: "Execution".to_string(),
            system_prompt: "Carry out the plan you are given against the workspace. Verify \
                            your changes where possible, then call task_complete with a summary."
                .to_string(),
            tool_names: with_task_complete(&[
                "read",
                "list",
                "search",
                "write",
                "edit",
                "run_command",
                "spawn_agent",
            ]),
            spawnable_agents: vec!["intelligence".to_string()],
            use_provider_tools: true,
        },
    ]
}
