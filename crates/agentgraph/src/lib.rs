//! agentgraph: resumable component-graph runtime for endpoint-driven agents
//!
//! An agent is a directed graph of components wired port to port. A request
//! enters through an endpoint component and is interpreted tick by tick:
//! - Component trait: process / post_process / validate_config, plus
//!   readable outputs for always-active components
//! - Scheduler: missing-input resolution, worklist propagation, bounded
//!   cycles, closure and stall detection
//! - Built-ins: fork/join over a job registry, stateful `for_each` loops,
//!   logic gates, passthrough and variables
//! - Snapshots: every tick is persisted so debug sessions can be stepped,
//!   resumed across processes and killed
//!
//! # Example
//!
//! ```rust,ignore
//! use agentgraph::{Agent, AgentGraph, ComponentDefinition};
//! use serde_json::json;
//!
//! let graph = AgentGraph::builder("echo")
//!     .component(
//!         ComponentDefinition::new("ep", "endpoint")
//!             .with_config(json!({"path": "/echo"}))
//!             .output("msg"),
//!     )
//!     .component(ComponentDefinition::new("out", "passthrough").input("msg"))
//!     .connect("ep", "msg", "out", "msg")
//!     .build()?;
//!
//! let agent = Agent::new(graph)?;
//! let output = agent.process("/echo", json!({"msg": "hi"})).await?;
//! ```

pub mod agent;
pub mod component;
pub mod connector;
pub mod engine;
pub mod graph;

// Re-exports for convenience
pub use agent::{Agent, AgentBuilder, AgentOutcome, AgentRequest, StepDelta};
pub use component::{
    Component, ComponentError, ComponentFlags, ComponentInput, ComponentKind, ComponentRegistry,
    ProcessContext,
};
pub use connector::{
    Connector, ConnectorError, ConnectorLocator, ConnectorRegistry, MemoryKvConnector,
    ScopedConnectors,
};
pub use engine::{
    create_store, AgentHandle, CallCounters, EngineConfig, EngineError, JobRegistry, JobStatus,
    MemoryJobRegistry, RunContext, RunOutput, Scheduler, Snapshot, SnapshotStore, StoreConfig,
};
pub use graph::{AgentDefinition, AgentGraph, ComponentDefinition, ComponentId, GraphError};
