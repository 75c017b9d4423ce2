use async_trait::async_trait;
use serde_json::Value;

use crate::component::{Component, ComponentError, ComponentInput, ProcessContext};

/// Emits its input object unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

#[async_trait]
impl Component for Passthrough {
    async fn process(
        &self,
        input: ComponentInput,
        _ctx: &mut ProcessContext,
    ) -> Result<Value, ComponentError> {
        Ok(Value::Object(input))
    }
}
