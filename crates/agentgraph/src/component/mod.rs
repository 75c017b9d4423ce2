//! Component contract
//!
//! Every node of an agent graph is an instance of a component kind. A kind
//! implements [`Component`]: it validates its static config, processes the
//! input gathered on its ports into an output object, and may expose a value
//! that downstream components can read without it firing.
//!
//! Built-in control components (endpoint, fork, join, loop, logic gates,
//! passthrough, variable) form the closed [`ComponentKind`] enum; business
//! components are registered by name in a [`ComponentRegistry`].

pub mod builtin;
mod context;
pub mod registry;

pub use context::{InvocationEffects, ProcessContext};
pub use registry::{kinds, ComponentKind, ComponentRegistry};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use thiserror::Error;

use crate::connector::ConnectorError;
use crate::engine::snapshot::RuntimeState;
use crate::graph::{ComponentId, ComponentInstance, ERROR_PORT};

/// Input of one invocation, keyed by input port name
pub type ComponentInput = Map<String, Value>;

/// Scheduling flags of a component kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentFlags {
    /// Fires every tick and never keeps a session open
    pub always_active: bool,

    /// While any exclusive component is active, only exclusive ones fire
    pub exclusive: bool,
}

impl ComponentFlags {
    pub const NONE: ComponentFlags = ComponentFlags {
        always_active: false,
        exclusive: false,
    };

    pub const ALWAYS_ACTIVE: ComponentFlags = ComponentFlags {
        always_active: true,
        exclusive: false,
    };

    pub const EXCLUSIVE: ComponentFlags = ComponentFlags {
        always_active: false,
        exclusive: true,
    };
}

/// Failure of a single component invocation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComponentError {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid input on port '{port}': {message}")]
    InvalidInput { port: String, message: String },

    #[error("{0}")]
    Failed(String),

    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Panicked: {0}")]
    Panicked(String),
}

impl ComponentError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    pub fn invalid_input(port: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            port: port.into(),
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }

    /// Short machine-readable category
    pub fn kind(&self) -> &'static str {
        match self {
            ComponentError::InvalidConfig(_) => "invalid_config",
            ComponentError::InvalidInput { .. } => "invalid_input",
            ComponentError::Failed(_) => "failed",
            ComponentError::Connector(_) => "connector",
            ComponentError::Runtime(_) => "runtime",
            ComponentError::Timeout(_) => "timeout",
            ComponentError::Panicked(_) => "panicked",
        }
    }

    /// The `_error` output this failure becomes
    pub fn to_output(&self, component: &ComponentId) -> Value {
        json!({
            ERROR_PORT: {
                "kind": self.kind(),
                "message": self.to_string(),
                "component": component,
            }
        })
    }
}

/// A component kind
#[async_trait]
pub trait Component: Send + Sync {
    fn flags(&self) -> ComponentFlags {
        ComponentFlags::NONE
    }

    /// Checked before every `process`; a failure becomes an error output
    fn validate_config(&self, _config: &Value) -> Result<(), ComponentError> {
        Ok(())
    }

    /// Turn the gathered input into an output object.
    ///
    /// Keys of the returned object feed the output ports of the same name.
    /// Returning `Value::Null` emits nothing.
    async fn process(
        &self,
        input: ComponentInput,
        ctx: &mut ProcessContext,
    ) -> Result<Value, ComponentError>;

    /// Runs after a successful `process`
    async fn post_process(
        &self,
        output: Value,
        _ctx: &mut ProcessContext,
    ) -> Result<Value, ComponentError> {
        Ok(output)
    }

    /// Whether a downstream component can read a value from this one now
    fn has_output(&self, _instance: &ComponentInstance, _state: &RuntimeState) -> bool {
        false
    }

    /// The value readable on `port` without this component firing
    fn read_output(
        &self,
        _instance: &ComponentInstance,
        _port: &str,
        _state: &RuntimeState,
    ) -> Option<Value> {
        None
    }
}
