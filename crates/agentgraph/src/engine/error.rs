//! Error types for the agent runtime
//!
//! Errors that abort or interrupt a session. Component failures are not
//! represented here: they become `_error` outputs inside the graph (see
//! [`crate::component::ComponentError`]).

use std::time::Duration;
use thiserror::Error;

use crate::engine::snapshot::LeafResult;
use crate::graph::{ComponentId, GraphError};

/// Errors that can occur while resolving, running or persisting a session
#[derive(Debug, Error)]
pub enum EngineError {
    /// No endpoint component matches the requested path and method
    #[error("Endpoint Not Found: {method} {path}")]
    EndpointNotFound { path: String, method: String },

    /// A component exceeded the circular-call limit of its request tag
    #[error("Circular limit {limit} exceeded by component {component_id}")]
    CircularLimit {
        component_id: ComponentId,
        limit: u32,
        partial: Vec<LeafResult>,
    },

    /// The session was killed by the client
    #[error("Session {session_id} killed")]
    Killed {
        session_id: String,
        partial: Vec<LeafResult>,
    },

    /// Tick safety limit exceeded before the session closed
    #[error("Max ticks exceeded: {max_ticks}")]
    MaxTicksExceeded {
        max_ticks: u64,
        partial: Vec<LeafResult>,
    },

    /// Run-to-completion exceeded its time budget
    #[error("Run timeout after {elapsed:?}")]
    RunTimeout {
        elapsed: Duration,
        partial: Vec<LeafResult>,
    },

    /// Debug step requested for a session that does not exist
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// A component references a kind that is neither built in nor registered
    #[error("Unknown component kind '{kind}' for component {component_id}")]
    UnknownComponentKind {
        component_id: ComponentId,
        kind: String,
    },

    /// Invalid agent graph
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Snapshot persistence failed
    #[error("Store error: {0}")]
    StoreError(String),

    /// Job registry failure
    #[error("Job error: {0}")]
    JobError(String),

    /// Invalid runtime configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl EngineError {
    /// Create an endpoint-not-found error
    pub fn endpoint_not_found(path: impl Into<String>, method: impl Into<String>) -> Self {
        Self::EndpointNotFound {
            path: path.into(),
            method: method.into(),
        }
    }

    /// Create a circular-limit error carrying the partial leaf results
    pub fn circular_limit(
        component_id: impl Into<ComponentId>,
        limit: u32,
        partial: Vec<LeafResult>,
    ) -> Self {
        Self::CircularLimit {
            component_id: component_id.into(),
            limit,
            partial,
        }
    }

    /// Create a killed error carrying the partial leaf results
    pub fn killed(session_id: impl Into<String>, partial: Vec<LeafResult>) -> Self {
        Self::Killed {
            session_id: session_id.into(),
            partial,
        }
    }

    /// Create a max-ticks error carrying the partial leaf results
    pub fn max_ticks(max_ticks: u64, partial: Vec<LeafResult>) -> Self {
        Self::MaxTicksExceeded { max_ticks, partial }
    }

    /// Create a run-timeout error carrying the partial leaf results
    pub fn run_timeout(elapsed: Duration, partial: Vec<LeafResult>) -> Self {
        Self::RunTimeout { elapsed, partial }
    }

    /// Create a store error
    pub fn store_error(message: impl Into<String>) -> Self {
        Self::StoreError(message.into())
    }

    /// Create a job error
    pub fn job_error(message: impl Into<String>) -> Self {
        Self::JobError(message.into())
    }

    /// Create a config error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Leaf results produced before the session was interrupted
    pub fn partial_results(&self) -> &[LeafResult] {
        match self {
            EngineError::CircularLimit { partial, .. }
            | EngineError::Killed { partial, .. }
            | EngineError::MaxTicksExceeded { partial, .. }
            | EngineError::RunTimeout { partial, .. } => partial,
            _ => &[],
        }
    }

    /// Check if the error ends the session for good
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::CircularLimit { .. }
                | EngineError::Killed { .. }
                | EngineError::MaxTicksExceeded { .. }
                | EngineError::RunTimeout { .. }
        )
    }

    /// Check if the error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::RunTimeout { .. })
    }
}
