use async_trait::async_trait;
use serde_json::{json, Value};

use crate::component::{Component, ComponentError, ComponentInput, ProcessContext};
use crate::engine::snapshot::LoopState;

/// Stateful loop (`for_each`).
///
/// The first invocation reads the `items` port. Each invocation then emits
/// one element as `{"item", "index", "length"}` and stays active; components
/// fed by it run inside its body and their leaf results are collected. Once
/// every element was emitted it emits `{"done": [...]}` and clears its state.
/// Items arriving while a loop runs are iterated by a fresh loop afterwards.
///
/// Config: `flatten` (one level) and `minimize` (drop nulls, unwrap
/// single-key objects) post-process the collected list.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForEach;

fn items_of(value: Option<Value>) -> Vec<Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items,
        Some(other) => vec![other],
    }
}

/// Concatenate nested arrays one level deep
pub fn flatten(values: Vec<Value>) -> Vec<Value> {
    values
        .into_iter()
        .flat_map(|value| match value {
            Value::Array(inner) => inner,
            other => vec![other],
        })
        .collect()
}

/// Drop nulls and unwrap single-key objects
pub fn minimize(values: Vec<Value>) -> Vec<Value> {
    values
        .into_iter()
        .filter(|value| !value.is_null())
        .map(|value| match value {
            Value::Object(map) if map.len() == 1 => {
                map.into_iter().next().map(|(_, v)| v).unwrap_or(Value::Null)
            }
            other => other,
        })
        .collect()
}

fn flag(config: &Value, key: &str) -> bool {
    config.get(key).and_then(Value::as_bool).unwrap_or(false)
}

#[async_trait]
impl Component for ForEach {
    async fn process(
        &self,
        mut input: ComponentInput,
        ctx: &mut ProcessContext,
    ) -> Result<Value, ComponentError> {
        let incoming = input.remove("items");
        let data = ctx.runtime_data_mut();
        match data.loop_state.as_mut() {
            Some(running) => {
                if let Some(items) = incoming {
                    running.queued.push(items_of(Some(items)));
                }
            }
            None => data.loop_state = Some(LoopState::new(items_of(incoming))),
        }

        if let Some(state) = ctx.runtime_data_mut().loop_state.as_mut() {
            if let Some((index, item)) = state.advance() {
                let length = state.length;
                ctx.keep_active();
                ctx.enter_loop_body();
                return Ok(json!({ "item": item, "index": index, "length": length }));
            }
        }

        let (results, follow_up) = ctx
            .runtime_data_mut()
            .loop_state
            .take()
            .map(LoopState::finish)
            .unwrap_or_default();
        tracing::debug!(component_id = %ctx.id(), collected = results.len(), "Loop finished");
        if follow_up.is_some() {
            ctx.runtime_data_mut().loop_state = follow_up;
            ctx.keep_active();
        }
        ctx.finish_loop();
        Ok(json!({ "done": results }))
    }

    async fn post_process(
        &self,
        mut output: Value,
        ctx: &mut ProcessContext,
    ) -> Result<Value, ComponentError> {
        if let Some(Value::Array(results)) = output.get_mut("done") {
            let mut values = std::mem::take(results);
            if flag(ctx.config(), "flatten") {
                values = flatten(values);
            }
            if flag(ctx.config(), "minimize") {
                values = minimize(values);
            }
            *results = values;
        }
        Ok(output)
    }
}
