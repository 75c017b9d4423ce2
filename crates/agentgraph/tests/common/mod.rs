//! Test components shared by the integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agentgraph::{
    Component, ComponentDefinition, ComponentError, ComponentInput, ComponentRegistry,
    ProcessContext,
};
use async_trait::async_trait;
use serde_json::{json, Value};

fn int_input(input: &ComponentInput, port: &str) -> Result<i64, ComponentError> {
    input
        .get(port)
        .and_then(Value::as_i64)
        .ok_or_else(|| ComponentError::invalid_input(port, "expected an integer"))
}

/// `n` → `2n`, bare or as `{"v": 2n}` when config `wrap` is set
pub struct Double;

#[async_trait]
impl Component for Double {
    async fn process(
        &self,
        input: ComponentInput,
        ctx: &mut ProcessContext,
    ) -> Result<Value, ComponentError> {
        let doubled = int_input(&input, "n")? * 2;
        if ctx.config().get("wrap").and_then(Value::as_bool).unwrap_or(false) {
            Ok(json!({ "v": doubled }))
        } else {
            Ok(json!(doubled))
        }
    }
}

/// Emits `{"value": config.value}`
pub struct Emit;

#[async_trait]
impl Component for Emit {
    async fn process(
        &self,
        _input: ComponentInput,
        ctx: &mut ProcessContext,
    ) -> Result<Value, ComponentError> {
        Ok(json!({ "value": ctx.config().get("value").cloned().unwrap_or(Value::Null) }))
    }
}

/// `n` → `{"again": n + 1}`, counting its invocations
#[derive(Default, Clone)]
pub struct Bounce {
    pub calls: Arc<AtomicUsize>,
}

impl Bounce {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Component for Bounce {
    async fn process(
        &self,
        input: ComponentInput,
        _ctx: &mut ProcessContext,
    ) -> Result<Value, ComponentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "again": int_input(&input, "n")? + 1 }))
    }
}

/// Always fails
pub struct Failing;

#[async_trait]
impl Component for Failing {
    async fn process(
        &self,
        _input: ComponentInput,
        _ctx: &mut ProcessContext,
    ) -> Result<Value, ComponentError> {
        Err(ComponentError::failed("boom"))
    }
}

/// Sleeps for config `ms`, then emits its input
pub struct Sleep;

#[async_trait]
impl Component for Sleep {
    async fn process(
        &self,
        input: ComponentInput,
        ctx: &mut ProcessContext,
    ) -> Result<Value, ComponentError> {
        let ms = ctx.config().get("ms").and_then(Value::as_u64).unwrap_or(10);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(Value::Object(input))
    }
}

pub fn registry() -> ComponentRegistry {
    ComponentRegistry::new()
        .with("double", Double)
        .and_then(|r| r.with("emit", Emit))
        .and_then(|r| r.with("failing", Failing))
        .and_then(|r| r.with("sleep", Sleep))
        .expect("test kinds are not built in")
}

pub fn endpoint(id: &str, path: &str, outputs: &[&str]) -> ComponentDefinition {
    outputs.iter().fold(
        ComponentDefinition::new(id, "endpoint").with_config(json!({ "path": path })),
        |def, port| def.output(*port),
    )
}
