//! Component kinds and the registry of custom components

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::builtin::{Endpoint, ForEach, Fork, Join, Logic, Passthrough, Variable};
use super::{Component, ComponentFlags};
use crate::engine::error::EngineError;

/// Names of the built-in kinds
pub mod kinds {
    pub const ENDPOINT: &str = "endpoint";
    pub const FORK: &str = "async";
    pub const JOIN: &str = "await";
    pub const FOR_EACH: &str = "for_each";
    pub const LOGIC: &str = "logic";
    pub const PASSTHROUGH: &str = "passthrough";
    pub const VARIABLE: &str = "variable";

    pub const BUILTIN: [&str; 7] = [
        ENDPOINT,
        FORK,
        JOIN,
        FOR_EACH,
        LOGIC,
        PASSTHROUGH,
        VARIABLE,
    ];
}

/// A resolved component kind: one of the built-ins or a registered component
#[derive(Clone)]
pub enum ComponentKind {
    Endpoint,
    Fork,
    Join,
    ForEach,
    Logic,
    Passthrough,
    Variable,
    Custom {
        name: String,
        component: Arc<dyn Component>,
    },
}

impl ComponentKind {
    /// The built-in kind with this name
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            kinds::ENDPOINT => Some(Self::Endpoint),
            kinds::FORK => Some(Self::Fork),
            kinds::JOIN => Some(Self::Join),
            kinds::FOR_EACH => Some(Self::ForEach),
            kinds::LOGIC => Some(Self::Logic),
            kinds::PASSTHROUGH => Some(Self::Passthrough),
            kinds::VARIABLE => Some(Self::Variable),
            _ => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Endpoint => kinds::ENDPOINT,
            Self::Fork => kinds::FORK,
            Self::Join => kinds::JOIN,
            Self::ForEach => kinds::FOR_EACH,
            Self::Logic => kinds::LOGIC,
            Self::Passthrough => kinds::PASSTHROUGH,
            Self::Variable => kinds::VARIABLE,
            Self::Custom { name, .. } => name,
        }
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self, Self::Custom { .. })
    }

    /// The implementation behind this kind
    pub fn into_component(self) -> Arc<dyn Component> {
        match self {
            Self::Endpoint => Arc::new(Endpoint),
            Self::Fork => Arc::new(Fork),
            Self::Join => Arc::new(Join),
            Self::ForEach => Arc::new(ForEach),
            Self::Logic => Arc::new(Logic),
            Self::Passthrough => Arc::new(Passthrough),
            Self::Variable => Arc::new(Variable),
            Self::Custom { component, .. } => component,
        }
    }

    pub fn flags(&self) -> ComponentFlags {
        self.clone().into_component().flags()
    }
}

impl fmt::Debug for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom { name, .. } => f.debug_tuple("Custom").field(name).finish(),
            builtin => f.debug_tuple("Builtin").field(&builtin.name()).finish(),
        }
    }
}

/// Table of custom component kinds by name
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    custom: HashMap<String, Arc<dyn Component>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom kind; built-in names are reserved
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        component: impl Component + 'static,
    ) -> Result<&mut Self, EngineError> {
        let kind = kind.into();
        if ComponentKind::builtin(&kind).is_some() {
            return Err(EngineError::config_error(format!(
                "component kind '{}' is built in",
                kind
            )));
        }
        self.custom.insert(kind, Arc::new(component));
        Ok(self)
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(
        mut self,
        kind: impl Into<String>,
        component: impl Component + 'static,
    ) -> Result<Self, EngineError> {
        self.register(kind, component)?;
        Ok(self)
    }

    /// Built-ins first, then registered kinds
    pub fn resolve(&self, kind: &str) -> Option<ComponentKind> {
        ComponentKind::builtin(kind).or_else(|| {
            self.custom.get(kind).map(|component| ComponentKind::Custom {
                name: kind.to_string(),
                component: component.clone(),
            })
        })
    }

    /// Every resolvable kind name, sorted
    pub fn kinds(&self) -> Vec<String> {
        let mut names: Vec<String> = kinds::BUILTIN
            .iter()
            .map(|k| k.to_string())
            .chain(self.custom.keys().cloned())
            .collect();
        names.sort();
        names
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut custom: Vec<&String> = self.custom.keys().collect();
        custom.sort();
        f.debug_struct("ComponentRegistry")
            .field("custom", &custom)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentError, ComponentInput, ProcessContext};
    use async_trait::async_trait;
    use serde_json::Value;

    struct Noop;

    #[async_trait]
    impl Component for Noop {
        async fn process(
            &self,
            input: ComponentInput,
            _ctx: &mut ProcessContext,
        ) -> Result<Value, ComponentError> {
            Ok(Value::Object(input))
        }
    }

    #[test]
    fn test_resolve_builtin_and_custom() {
        let registry = ComponentRegistry::new().with("noop", Noop).unwrap();

        assert!(registry.resolve("endpoint").unwrap().is_builtin());
        assert_eq!(registry.resolve("async").unwrap().name(), "async");

        let custom = registry.resolve("noop").unwrap();
        assert!(!custom.is_builtin());
        assert_eq!(custom.name(), "noop");

        assert!(registry.resolve("missing").is_none());
    }

    #[test]
    fn test_builtin_names_are_reserved() {
        let mut registry = ComponentRegistry::new();
        assert!(registry.register("for_each", Noop).is_err());
    }

    #[test]
    fn test_builtin_flags() {
        assert!(ComponentKind::Variable.flags().always_active);
        assert!(!ComponentKind::Endpoint.flags().always_active);
    }

    #[test]
    fn test_kinds_listing() {
        let registry = ComponentRegistry::new().with("noop", Noop).unwrap();
        let kinds = registry.kinds();
        assert_eq!(kinds.len(), 8);
        assert!(kinds.contains(&"noop".to_string()));
    }
}
