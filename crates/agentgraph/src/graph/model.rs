//! Validated agent graphs
//!
//! An [`AgentGraph`] is the immutable form of an [`AgentDefinition`]: port
//! references are resolved to indices, both ends of every connection are
//! checked, and each component's `next`/`prev` adjacency is computed once.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use super::definition::{
    AgentDefinition, ComponentDefinition, ConnectionDefinition, PortDefinition, PortRef,
};
use super::port::Port;
use super::ComponentId;
use crate::component::kinds;

/// Errors raised while building a graph
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Agent '{0}' has no components")]
    NoComponents(String),

    #[error("Duplicate component id: {0}")]
    DuplicateComponent(ComponentId),

    #[error("Duplicate {direction} port '{port}' on component {component}")]
    DuplicatePort {
        component: ComponentId,
        port: String,
        direction: &'static str,
    },

    #[error("Unknown component '{component}' referenced by connection #{connection}")]
    UnknownComponent { component: String, connection: usize },

    #[error("Unknown {direction} port {port} on component {component}")]
    UnknownPort {
        component: ComponentId,
        port: String,
        direction: &'static str,
    },

    #[error("Invalid fork target in {component}: {reason}")]
    InvalidForkTarget {
        component: ComponentId,
        reason: String,
    },

    #[error("Failed to parse agent definition: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A component instance with resolved ports and adjacency
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentInstance {
    pub id: ComponentId,
    pub kind: String,
    pub config: Value,
    pub inputs: Vec<Port>,
    pub outputs: Vec<Port>,
    pub next: Vec<ComponentId>,
    pub prev: Vec<ComponentId>,
}

impl ComponentInstance {
    pub fn input(&self, name: &str) -> Option<&Port> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&Port> {
        self.outputs.iter().find(|p| p.name == name)
    }

    /// A component without outgoing connections is a leaf
    pub fn is_leaf(&self) -> bool {
        self.next.is_empty()
    }

    pub fn required_inputs(&self) -> impl Iterator<Item = &Port> {
        self.inputs.iter().filter(|p| p.is_required())
    }

    /// String field of the static config
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    pub(crate) fn to_definition(&self) -> ComponentDefinition {
        let port_def = |p: &Port| PortDefinition {
            name: p.name.clone(),
            default: p.default.clone(),
            optional: p.optional,
            expression: p.expression.clone(),
        };
        ComponentDefinition {
            id: self.id.0.clone(),
            kind: self.kind.clone(),
            config: self.config.clone(),
            inputs: self.inputs.iter().map(port_def).collect(),
            outputs: self.outputs.iter().map(port_def).collect(),
        }
    }
}

/// A connection between two resolved ports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Connection {
    /// Declaration order within the agent definition
    pub index: usize,
    pub source: ComponentId,
    pub source_port: usize,
    pub target: ComponentId,
    pub target_port: usize,
}

/// Validated, immutable agent graph
#[derive(Debug, Clone)]
pub struct AgentGraph {
    id: String,
    name: String,
    circular_limit: Option<u32>,
    components: HashMap<ComponentId, Arc<ComponentInstance>>,
    order: Vec<ComponentId>,
    connections: Vec<Connection>,
    outgoing: HashMap<ComponentId, Vec<usize>>,
    incoming: HashMap<ComponentId, Vec<usize>>,
}

impl AgentGraph {
    /// Start a fluent builder
    pub fn builder(id: impl Into<String>) -> super::AgentGraphBuilder {
        super::AgentGraphBuilder::new(id)
    }

    /// Parse and build a graph from JSON text
    pub fn from_json(text: &str) -> Result<Self, GraphError> {
        let definition: AgentDefinition = serde_json::from_str(text)?;
        Self::from_definition(definition)
    }

    /// Build a graph from a definition, validating ports and connections
    pub fn from_definition(definition: AgentDefinition) -> Result<Self, GraphError> {
        if definition.components.is_empty() {
            return Err(GraphError::NoComponents(definition.id));
        }

        let mut instances: HashMap<ComponentId, ComponentInstance> = HashMap::new();
        let mut order = Vec::with_capacity(definition.components.len());

        for component in &definition.components {
            let id = ComponentId::new(component.id.clone());
            if instances.contains_key(&id) {
                return Err(GraphError::DuplicateComponent(id));
            }
            let inputs = resolve_ports(&id, &component.inputs, "input")?;
            let outputs = resolve_ports(&id, &component.outputs, "output")?;
            order.push(id.clone());
            instances.insert(
                id.clone(),
                ComponentInstance {
                    id,
                    kind: component.kind.clone(),
                    config: component.config.clone(),
                    inputs,
                    outputs,
                    next: Vec::new(),
                    prev: Vec::new(),
                },
            );
        }

        let mut connections = Vec::with_capacity(definition.connections.len());
        let mut outgoing: HashMap<ComponentId, Vec<usize>> = HashMap::new();
        let mut incoming: HashMap<ComponentId, Vec<usize>> = HashMap::new();

        for (index, conn) in definition.connections.iter().enumerate() {
            let source = ComponentId::new(conn.source.clone());
            let target = ComponentId::new(conn.target.clone());

            let source_port = {
                let instance = instances.get(&source).ok_or_else(|| {
                    GraphError::UnknownComponent {
                        component: conn.source.clone(),
                        connection: index,
                    }
                })?;
                find_port(instance, &instance.outputs, &conn.source_port, "output")?
            };
            let target_port = {
                let instance = instances.get(&target).ok_or_else(|| {
                    GraphError::UnknownComponent {
                        component: conn.target.clone(),
                        connection: index,
                    }
                })?;
                find_port(instance, &instance.inputs, &conn.target_port, "input")?
            };

            if let Some(instance) = instances.get_mut(&source) {
                if !instance.next.contains(&target) {
                    instance.next.push(target.clone());
                }
            }
            if let Some(instance) = instances.get_mut(&target) {
                if !instance.prev.contains(&source) {
                    instance.prev.push(source.clone());
                }
            }

            outgoing.entry(source.clone()).or_default().push(index);
            incoming.entry(target.clone()).or_default().push(index);
            connections.push(Connection {
                index,
                source,
                source_port,
                target,
                target_port,
            });
        }

        for instance in instances.values() {
            if instance.kind == kinds::FORK {
                validate_fork_target(instance, &instances)?;
            }
        }

        Ok(Self {
            id: definition.id.clone(),
            name: definition.name.clone().unwrap_or(definition.id),
            circular_limit: definition.circular_limit,
            components: instances
                .into_iter()
                .map(|(id, instance)| (id, Arc::new(instance)))
                .collect(),
            order,
            connections,
            outgoing,
            incoming,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Per-agent circular-call limit, if the definition sets one
    pub fn circular_limit(&self) -> Option<u32> {
        self.circular_limit
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn component(&self, id: &ComponentId) -> Option<&Arc<ComponentInstance>> {
        self.components.get(id)
    }

    /// Component instances in declaration order
    pub fn components(&self) -> impl Iterator<Item = &Arc<ComponentInstance>> {
        self.order.iter().filter_map(|id| self.components.get(id))
    }

    /// Component ids in declaration order
    pub fn component_ids(&self) -> &[ComponentId] {
        &self.order
    }

    /// All connections in declaration order
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Outgoing connections of a component in declaration order
    pub fn outgoing(&self, id: &ComponentId) -> impl Iterator<Item = &Connection> {
        self.outgoing
            .get(id)
            .into_iter()
            .flatten()
            .map(|&i| &self.connections[i])
    }

    /// Connections feeding one input port of a component
    pub fn incoming(&self, id: &ComponentId, port: usize) -> impl Iterator<Item = &Connection> {
        self.incoming
            .get(id)
            .into_iter()
            .flatten()
            .map(|&i| &self.connections[i])
            .filter(move |c| c.target_port == port)
    }

    /// Find the endpoint component serving `path` and `method`.
    ///
    /// Paths compare without trailing slashes; methods compare
    /// case-insensitively, and an endpoint without a method accepts any.
    pub fn find_endpoint(&self, path: &str, method: &str) -> Option<&ComponentId> {
        let wanted = normalize_path(path);
        self.components()
            .filter(|c| c.kind == kinds::ENDPOINT)
            .find(|c| {
                let path_matches = c
                    .config_str("path")
                    .map(|p| normalize_path(p) == wanted)
                    .unwrap_or(false);
                let method_matches = c
                    .config_str("method")
                    .map(|m| m.eq_ignore_ascii_case(method))
                    .unwrap_or(true);
                path_matches && method_matches
            })
            .map(|c| &c.id)
    }

    /// Rebuild the serializable definition of this graph
    pub fn to_definition(&self) -> AgentDefinition {
        AgentDefinition {
            id: self.id.clone(),
            name: Some(self.name.clone()),
            circular_limit: self.circular_limit,
            components: self.components().map(|c| c.to_definition()).collect(),
            connections: self
                .connections
                .iter()
                .map(|c| {
                    ConnectionDefinition::new(
                        c.source.0.clone(),
                        c.source_port,
                        c.target.0.clone(),
                        c.target_port,
                    )
                })
                .collect(),
        }
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn resolve_ports(
    component: &ComponentId,
    defs: &[PortDefinition],
    direction: &'static str,
) -> Result<Vec<Port>, GraphError> {
    let mut ports: Vec<Port> = Vec::with_capacity(defs.len());
    for (index, def) in defs.iter().enumerate() {
        if ports.iter().any(|p| p.name == def.name) {
            return Err(GraphError::DuplicatePort {
                component: component.clone(),
                port: def.name.clone(),
                direction,
            });
        }
        ports.push(Port {
            name: def.name.clone(),
            index,
            default: def.default.clone(),
            optional: def.optional,
            expression: def.expression.clone(),
        });
    }
    Ok(ports)
}

fn find_port(
    instance: &ComponentInstance,
    ports: &[Port],
    port: &PortRef,
    direction: &'static str,
) -> Result<usize, GraphError> {
    let found = match port {
        PortRef::Index(i) => ports.get(*i).map(|p| p.index),
        PortRef::Name(name) => ports.iter().find(|p| &p.name == name).map(|p| p.index),
    };
    found.ok_or_else(|| GraphError::UnknownPort {
        component: instance.id.clone(),
        port: port.to_string(),
        direction,
    })
}

fn validate_fork_target(
    instance: &ComponentInstance,
    instances: &HashMap<ComponentId, ComponentInstance>,
) -> Result<(), GraphError> {
    let target = instance
        .config_str("target")
        .ok_or_else(|| GraphError::InvalidForkTarget {
            component: instance.id.clone(),
            reason: "missing 'target' in config".to_string(),
        })?;
    let target = ComponentId::from(target);
    if target == instance.id {
        return Err(GraphError::InvalidForkTarget {
            component: instance.id.clone(),
            reason: "a fork cannot target itself".to_string(),
        });
    }
    if !instances.contains_key(&target) {
        return Err(GraphError::InvalidForkTarget {
            component: instance.id.clone(),
            reason: format!("unknown target '{}'", target),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ComponentDefinition;
    use serde_json::json;

    fn diamond() -> AgentGraph {
        AgentGraph::builder("diamond")
            .component(
                ComponentDefinition::new("ep", "endpoint")
                    .with_config(json!({"path": "/run", "method": "POST"}))
                    .output("x"),
            )
            .component(ComponentDefinition::new("a", "passthrough").input("x").output("x"))
            .component(ComponentDefinition::new("b", "passthrough").input("x").output("x"))
            .component(
                ComponentDefinition::new("join", "passthrough")
                    .input("left")
                    .input("right"),
            )
            .connect("ep", "x", "a", "x")
            .connect("ep", "x", "b", "x")
            .connect("a", "x", "join", "left")
            .connect("b", "x", "join", "right")
            .build()
            .unwrap()
    }

    #[test]
    fn test_adjacency_computed() {
        let graph = diamond();
        let ep = graph.component(&"ep".into()).unwrap();
        assert_eq!(ep.next, vec![ComponentId::from("a"), ComponentId::from("b")]);
        assert!(ep.prev.is_empty());

        let join = graph.component(&"join".into()).unwrap();
        assert_eq!(join.prev.len(), 2);
        assert!(join.is_leaf());
    }

    #[test]
    fn test_incoming_by_port() {
        let graph = diamond();
        let right: Vec<_> = graph.incoming(&"join".into(), 1).collect();
        assert_eq!(right.len(), 1);
        assert_eq!(right[0].source.as_str(), "b");
    }

    #[test]
    fn test_outgoing_declaration_order() {
        let graph = diamond();
        let indices: Vec<_> = graph.outgoing(&"ep".into()).map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn test_find_endpoint() {
        let graph = diamond();
        assert_eq!(graph.find_endpoint("/run", "post").map(|c| c.as_str()), Some("ep"));
        assert_eq!(graph.find_endpoint("run/", "POST").map(|c| c.as_str()), Some("ep"));
        assert!(graph.find_endpoint("/run", "GET").is_none());
        assert!(graph.find_endpoint("/other", "POST").is_none());
    }

    #[test]
    fn test_unknown_port_rejected() {
        let result = AgentGraph::builder("bad")
            .component(ComponentDefinition::new("a", "passthrough").output("x"))
            .component(ComponentDefinition::new("b", "passthrough").input("y"))
            .connect("a", "x", "b", "nope")
            .build();
        assert!(matches!(result, Err(GraphError::UnknownPort { .. })));
    }

    #[test]
    fn test_unknown_component_rejected() {
        let result = AgentGraph::builder("bad")
            .component(ComponentDefinition::new("a", "passthrough").output("x"))
            .connect("a", "x", "ghost", 0usize)
            .build();
        assert!(matches!(result, Err(GraphError::UnknownComponent { .. })));
    }

    #[test]
    fn test_duplicate_component_rejected() {
        let result = AgentGraph::builder("bad")
            .component(ComponentDefinition::new("a", "passthrough"))
            .component(ComponentDefinition::new("a", "passthrough"))
            .build();
        assert!(matches!(result, Err(GraphError::DuplicateComponent(_))));
    }

    #[test]
    fn test_empty_graph_rejected() {
        let result = AgentGraph::builder("empty").build();
        assert!(matches!(result, Err(GraphError::NoComponents(_))));
    }

    #[test]
    fn test_fork_target_validated() {
        let result = AgentGraph::builder("bad")
            .component(
                ComponentDefinition::new("f", "async").with_config(json!({"target": "ghost"})),
            )
            .build();
        assert!(matches!(result, Err(GraphError::InvalidForkTarget { .. })));
    }

    #[test]
    fn test_definition_roundtrip() {
        let graph = diamond();
        let rebuilt = AgentGraph::from_definition(graph.to_definition()).unwrap();
        assert_eq!(rebuilt.connections(), graph.connections());
        assert_eq!(rebuilt.component_ids(), graph.component_ids());
    }
}
