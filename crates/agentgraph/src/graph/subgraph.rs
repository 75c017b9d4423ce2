//! Fork sub-graph derivation
//!
//! A fork runs the part of the agent reachable from its target as an
//! independent agent. The derived graph holds every component reachable
//! from the target (following nested fork targets too), the connections
//! among them, and a synthesized entry endpoint whose outputs re-expose the
//! target's input ports.

use serde_json::json;
use std::collections::{HashSet, VecDeque};

use super::definition::{AgentDefinition, ComponentDefinition, ConnectionDefinition};
use super::model::{AgentGraph, GraphError};
use super::ComponentId;
use crate::component::kinds;

/// Path served by synthesized fork entry endpoints
pub const FORK_ENTRY_PATH: &str = "/__fork__";

/// A derived fork graph and its entry component
#[derive(Debug, Clone)]
pub struct ForkGraph {
    pub graph: AgentGraph,
    pub entry: ComponentId,
}

/// Derive the minimal runnable graph rooted at `target`
pub fn derive_fork_graph(graph: &AgentGraph, target: &ComponentId) -> Result<ForkGraph, GraphError> {
    let target_instance = graph
        .component(target)
        .ok_or_else(|| GraphError::InvalidForkTarget {
            component: target.clone(),
            reason: "target not in graph".to_string(),
        })?;

    let reachable = reachable_from(graph, target);

    let entry = ComponentId::new(format!("__fork_entry_{}", target));
    let mut entry_def = ComponentDefinition::new(entry.0.clone(), kinds::ENDPOINT)
        .with_config(json!({ "path": FORK_ENTRY_PATH }));
    for port in &target_instance.inputs {
        entry_def = entry_def.output(port.name.clone());
    }

    let mut components = vec![entry_def];
    components.extend(
        graph
            .components()
            .filter(|c| reachable.contains(&c.id))
            .map(|c| c.to_definition()),
    );

    let mut connections: Vec<ConnectionDefinition> = target_instance
        .inputs
        .iter()
        .map(|port| ConnectionDefinition::new(entry.0.clone(), port.index, target.0.clone(), port.index))
        .collect();
    connections.extend(
        graph
            .connections()
            .iter()
            .filter(|c| reachable.contains(&c.source) && reachable.contains(&c.target))
            .map(|c| {
                ConnectionDefinition::new(
                    c.source.0.clone(),
                    c.source_port,
                    c.target.0.clone(),
                    c.target_port,
                )
            }),
    );

    let definition = AgentDefinition {
        id: format!("{}::{}", graph.id(), target),
        name: Some(format!("{} (fork of {})", graph.name(), target)),
        circular_limit: graph.circular_limit(),
        components,
        connections,
    };

    Ok(ForkGraph {
        graph: AgentGraph::from_definition(definition)?,
        entry,
    })
}

fn reachable_from(graph: &AgentGraph, start: &ComponentId) -> HashSet<ComponentId> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([start.clone()]);

    while let Some(id) = queue.pop_front() {
        if !seen.insert(id.clone()) {
            continue;
        }
        let Some(instance) = graph.component(&id) else {
            continue;
        };
        queue.extend(instance.next.iter().cloned());
        if instance.kind == kinds::FORK {
            if let Some(nested) = instance.config_str("target") {
                queue.push_back(ComponentId::from(nested));
            }
        }
    }

    seen
}
