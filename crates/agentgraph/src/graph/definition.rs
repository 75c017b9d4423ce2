//! Serializable agent definitions
//!
//! The JSON shape an agent is authored in. Ports are listed per component;
//! connections reference ports either by name or by index.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Serializable description of an agent graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Agent identifier, also the job-registry namespace
    pub id: String,

    /// Human-readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Per-agent override of the circular-call limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circular_limit: Option<u32>,

    /// Component instances in declaration order
    pub components: Vec<ComponentDefinition>,

    /// Connections in declaration order
    #[serde(default)]
    pub connections: Vec<ConnectionDefinition>,
}

impl AgentDefinition {
    /// Parse a definition from JSON text
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// One component instance in a definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDefinition {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub inputs: Vec<PortDefinition>,
    #[serde(default)]
    pub outputs: Vec<PortDefinition>,
}

impl ComponentDefinition {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            config: Value::Null,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Add a required input port
    pub fn input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(PortDefinition::new(name));
        self
    }

    /// Add an optional input port
    pub fn optional_input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(PortDefinition::new(name).optional());
        self
    }

    /// Add an input port with a default value
    pub fn input_with_default(mut self, name: impl Into<String>, default: Value) -> Self {
        self.inputs.push(PortDefinition::new(name).with_default(default));
        self
    }

    /// Add an output port
    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(PortDefinition::new(name));
        self
    }

    /// Add an output port that selects a dotted sub-field of the result
    pub fn output_with_expression(
        mut self,
        name: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        self.outputs
            .push(PortDefinition::new(name).with_expression(expression));
        self
    }
}

/// A port as written in a definition; its index is its position in the list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

impl PortDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
            optional: false,
            expression: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }
}

/// Reference to a port by position or by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortRef {
    Index(usize),
    Name(String),
}

impl From<usize> for PortRef {
    fn from(index: usize) -> Self {
        PortRef::Index(index)
    }
}

impl From<&str> for PortRef {
    fn from(name: &str) -> Self {
        PortRef::Name(name.to_string())
    }
}

impl From<String> for PortRef {
    fn from(name: String) -> Self {
        PortRef::Name(name)
    }
}

impl std::fmt::Display for PortRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortRef::Index(i) => write!(f, "#{}", i),
            PortRef::Name(n) => write!(f, "{}", n),
        }
    }
}

/// A connection as written in a definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDefinition {
    pub source: String,
    pub source_port: PortRef,
    pub target: String,
    pub target_port: PortRef,
}

impl ConnectionDefinition {
    pub fn new(
        source: impl Into<String>,
        source_port: impl Into<PortRef>,
        target: impl Into<String>,
        target_port: impl Into<PortRef>,
    ) -> Self {
        Self {
            source: source.into(),
            source_port: source_port.into(),
            target: target.into(),
            target_port: target_port.into(),
        }
    }
}
