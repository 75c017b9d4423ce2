use async_trait::async_trait;
use serde_json::{json, Value};

use crate::component::{Component, ComponentError, ComponentFlags, ComponentInput, ProcessContext};
use crate::engine::snapshot::RuntimeState;
use crate::graph::ComponentInstance;

const VALUE_KEY: &str = "value";

/// Always-active session variable.
///
/// A value arriving on the `set` port is stored and emitted as `{"value"}`.
/// Downstream components can read the stored value (or config `initial`)
/// on any tick without the variable firing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Variable;

fn stored(instance: &ComponentInstance, state: &RuntimeState) -> Option<Value> {
    state
        .runtime_data
        .extra
        .get(VALUE_KEY)
        .or_else(|| instance.config.get("initial"))
        .cloned()
}

#[async_trait]
impl Component for Variable {
    fn flags(&self) -> ComponentFlags {
        ComponentFlags::ALWAYS_ACTIVE
    }

    async fn process(
        &self,
        mut input: ComponentInput,
        ctx: &mut ProcessContext,
    ) -> Result<Value, ComponentError> {
        match input.remove("set") {
            Some(value) => {
                ctx.runtime_data_mut()
                    .extra
                    .insert(VALUE_KEY.to_string(), value.clone());
                Ok(json!({ VALUE_KEY: value }))
            }
            None => Ok(Value::Null),
        }
    }

    fn has_output(&self, instance: &ComponentInstance, state: &RuntimeState) -> bool {
        stored(instance, state).is_some()
    }

    fn read_output(
        &self,
        instance: &ComponentInstance,
        _port: &str,
        state: &RuntimeState,
    ) -> Option<Value> {
        stored(instance, state)
    }
}
