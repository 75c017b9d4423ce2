use async_trait::async_trait;
use serde_json::{json, Value};

use crate::component::{Component, ComponentError, ComponentInput, ProcessContext};
use crate::graph::ComponentId;

/// Fork (`async`): runs the sub-graph rooted at `target` as a detached job.
///
/// The input is handed to the target's input ports and `{"job_id": ..}` is
/// emitted immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fork;

fn target(config: &Value) -> Result<ComponentId, ComponentError> {
    config
        .get("target")
        .and_then(Value::as_str)
        .map(ComponentId::from)
        .ok_or_else(|| ComponentError::invalid_config("async requires a string 'target'"))
}

#[async_trait]
impl Component for Fork {
    fn validate_config(&self, config: &Value) -> Result<(), ComponentError> {
        target(config).map(|_| ())
    }

    async fn process(
        &self,
        input: ComponentInput,
        ctx: &mut ProcessContext,
    ) -> Result<Value, ComponentError> {
        let target = target(ctx.config())?;
        let job_id = ctx.fork(&target, input).await?;
        tracing::debug!(component_id = %ctx.id(), %target, %job_id, "Forked job");
        Ok(json!({ "job_id": job_id }))
    }
}
