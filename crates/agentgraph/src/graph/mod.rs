//! Agent graph model
//!
//! An agent is a directed graph of component instances wired by
//! connections between their ports.
//!
//! - **Definition**: the serde form loaded from JSON ([`AgentDefinition`])
//! - **Port**: a named slot on a component, with optional default, optional
//!   flag and (for outputs) a dotted selection expression
//! - **Connection**: `(source, output port) → (target, input port)`
//! - **AgentGraph**: the validated, immutable graph with `next`/`prev`
//!   adjacency computed once at build time
//!
//! # Example
//!
//! ```ignore
//! use agentgraph::graph::{AgentGraph, ComponentDefinition};
//! use serde_json::json;
//!
//! let graph = AgentGraph::builder("doubler")
//!     .component(
//!         ComponentDefinition::new("ep", "endpoint")
//!             .with_config(json!({"path": "/run"}))
//!             .output("value"),
//!     )
//!     .component(ComponentDefinition::new("sink", "passthrough").input("value"))
//!     .connect("ep", "value", "sink", "value")
//!     .build()?;
//! ```

pub mod builder;
pub mod definition;
pub mod model;
pub mod port;
pub mod subgraph;
pub mod visualization;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use builder::AgentGraphBuilder;
pub use definition::{
    AgentDefinition, ComponentDefinition, ConnectionDefinition, PortDefinition, PortRef,
};
pub use model::{AgentGraph, ComponentInstance, Connection, GraphError};
pub use port::{
    error_of, lookup_path, merge_port_values, resolve_output, Port, DEFAULT_OUTPUT, ERROR_PORT,
};
pub use subgraph::{derive_fork_graph, ForkGraph, FORK_ENTRY_PATH};

/// Unique identifier for a component instance within an agent
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(pub String);

impl ComponentId {
    /// Create a new component ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ComponentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ComponentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&ComponentId> for ComponentId {
    fn from(id: &ComponentId) -> Self {
        id.clone()
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
