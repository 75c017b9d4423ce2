//! Fluent builder for agent graphs

use super::definition::{AgentDefinition, ComponentDefinition, ConnectionDefinition, PortRef};
use super::model::{AgentGraph, GraphError};

/// Builder that accumulates a definition and validates it on `build()`
#[derive(Debug, Clone)]
pub struct AgentGraphBuilder {
    definition: AgentDefinition,
}

impl AgentGraphBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            definition: AgentDefinition {
                id: id.into(),
                name: None,
                circular_limit: None,
                components: Vec::new(),
                connections: Vec::new(),
            },
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.definition.name = Some(name.into());
        self
    }

    /// Override the runtime's circular-call limit for this agent
    pub fn circular_limit(mut self, limit: u32) -> Self {
        self.definition.circular_limit = Some(limit);
        self
    }

    pub fn component(mut self, component: ComponentDefinition) -> Self {
        self.definition.components.push(component);
        self
    }

    /// Connect an output port of `source` to an input port of `target`
    pub fn connect(
        mut self,
        source: impl Into<String>,
        source_port: impl Into<PortRef>,
        target: impl Into<String>,
        target_port: impl Into<PortRef>,
    ) -> Self {
        self.definition.connections.push(ConnectionDefinition::new(
            source,
            source_port,
            target,
            target_port,
        ));
        self
    }

    /// The definition accumulated so far
    pub fn definition(&self) -> &AgentDefinition {
        &self.definition
    }

    pub fn build(self) -> Result<AgentGraph, GraphError> {
        AgentGraph::from_definition(self.definition)
    }
}
