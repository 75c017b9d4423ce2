//! Connector service locator
//!
//! Components reach external systems through connectors looked up by
//! `(kind, name)`. Backends are supplied by the embedding application; this
//! module defines the lookup contract, an allow-list wrapper, and a small
//! in-memory key/value connector.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Connector lookup and call failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConnectorError {
    #[error("Connector not found: {kind}/{name}")]
    NotFound { kind: String, name: String },

    #[error("Access denied to connector {kind}/{name}")]
    AccessDenied { kind: String, name: String },

    #[error("Connector operation '{operation}' failed: {message}")]
    Operation { operation: String, message: String },
}

impl ConnectorError {
    pub fn operation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Operation {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// A handle to an external system
#[async_trait]
pub trait Connector: Send + Sync {
    fn kind(&self) -> &str;

    fn name(&self) -> &str;

    async fn call(&self, operation: &str, args: Value) -> Result<Value, ConnectorError>;
}

/// Resolves connectors by kind and name
pub trait ConnectorLocator: Send + Sync {
    fn get_connector(&self, kind: &str, name: &str) -> Result<Arc<dyn Connector>, ConnectorError>;
}

/// Connectors registered by `(kind, name)`
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<(String, String), Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, connector: impl Connector + 'static) -> &mut Self {
        let key = (connector.kind().to_string(), connector.name().to_string());
        self.connectors.insert(key, Arc::new(connector));
        self
    }

    pub fn with(mut self, connector: impl Connector + 'static) -> Self {
        self.register(connector);
        self
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}

impl ConnectorLocator for ConnectorRegistry {
    fn get_connector(&self, kind: &str, name: &str) -> Result<Arc<dyn Connector>, ConnectorError> {
        self.connectors
            .get(&(kind.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ConnectorError::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            })
    }
}

/// Allow-list wrapper around another locator
pub struct ScopedConnectors {
    inner: Arc<dyn ConnectorLocator>,
    allowed: HashSet<(String, String)>,
}

impl ScopedConnectors {
    pub fn new(inner: Arc<dyn ConnectorLocator>) -> Self {
        Self {
            inner,
            allowed: HashSet::new(),
        }
    }

    pub fn allow(mut self, kind: impl Into<String>, name: impl Into<String>) -> Self {
        self.allowed.insert((kind.into(), name.into()));
        self
    }
}

impl ConnectorLocator for ScopedConnectors {
    fn get_connector(&self, kind: &str, name: &str) -> Result<Arc<dyn Connector>, ConnectorError> {
        if !self.allowed.contains(&(kind.to_string(), name.to_string())) {
            tracing::warn!(kind, name, "Connector access denied");
            return Err(ConnectorError::AccessDenied {
                kind: kind.to_string(),
                name: name.to_string(),
            });
        }
        self.inner.get_connector(kind, name)
    }
}

/// In-memory key/value connector (`kind = "kv"`).
///
/// Operations: `get {key}`, `set {key, value}`, `delete {key}`.
#[derive(Debug, Default)]
pub struct MemoryKvConnector {
    name: String,
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryKvConnector {
    pub const KIND: &'static str = "kv";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: RwLock::new(HashMap::new()),
        }
    }
}

fn key_arg<'a>(operation: &str, args: &'a Value) -> Result<&'a str, ConnectorError> {
    args.get("key")
        .and_then(Value::as_str)
        .ok_or_else(|| ConnectorError::operation(operation, "missing string 'key'"))
}

#[async_trait]
impl Connector for MemoryKvConnector {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, operation: &str, args: Value) -> Result<Value, ConnectorError> {
        match operation {
            "get" => {
                let key = key_arg(operation, &args)?;
                let values = self.values.read().await;
                Ok(values.get(key).cloned().unwrap_or(Value::Null))
            }
            "set" => {
                let key = key_arg(operation, &args)?.to_string();
                let value = args.get("value").cloned().unwrap_or(Value::Null);
                self.values.write().await.insert(key, value);
                Ok(json!({"ok": true}))
            }
            "delete" => {
                let key = key_arg(operation, &args)?;
                let removed = self.values.write().await.remove(key);
                Ok(json!({"deleted": removed.is_some()}))
            }
            other => Err(ConnectorError::operation(other, "unsupported operation")),
        }
    }
}
