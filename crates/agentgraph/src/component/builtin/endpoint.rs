use async_trait::async_trait;
use serde_json::Value;

use crate::component::{Component, ComponentError, ComponentInput, ProcessContext};

/// Entry point of a request.
///
/// Config: `path` (required) and `method` (any method when absent). The
/// request body arrives as the endpoint's input and is emitted unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Endpoint;

#[async_trait]
impl Component for Endpoint {
    fn validate_config(&self, config: &Value) -> Result<(), ComponentError> {
        match config.get("path") {
            Some(Value::String(_)) => Ok(()),
            _ => Err(ComponentError::invalid_config("endpoint requires a string 'path'")),
        }
    }

    async fn process(
        &self,
        input: ComponentInput,
        _ctx: &mut ProcessContext,
    ) -> Result<Value, ComponentError> {
        Ok(Value::Object(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoint_requires_path() {
        assert!(Endpoint.validate_config(&json!({"path": "/run"})).is_ok());
        assert!(Endpoint.validate_config(&json!({})).is_err());
        assert!(Endpoint.validate_config(&json!({"path": 3})).is_err());
    }
}
