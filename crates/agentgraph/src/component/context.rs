//! Per-invocation component context

use serde_json::{Map, Value};
use std::sync::Arc;

use super::ComponentError;
use crate::connector::Connector;
use crate::engine::context::AgentHandle;
use crate::engine::snapshot::RuntimeData;
use crate::graph::{ComponentId, ComponentInstance};

/// What a component sees and may change during one invocation.
///
/// Besides read access to its instance, a component owns its
/// [`RuntimeData`] for the duration of the call and can signal scheduling
/// intents (stay active, open or close a loop body) that the scheduler
/// applies once the invocation returns.
#[derive(Debug)]
pub struct ProcessContext {
    instance: Arc<ComponentInstance>,
    step: u64,
    runtime_data: RuntimeData,
    handle: AgentHandle,
    keep_active: bool,
    loop_body: bool,
    loop_finished: bool,
    spawned_jobs: Vec<String>,
}

/// Scheduling intents collected from one invocation
#[derive(Debug, Default)]
pub struct InvocationEffects {
    pub runtime_data: RuntimeData,
    pub keep_active: bool,
    pub loop_body: bool,
    pub loop_finished: bool,
    pub spawned_jobs: Vec<String>,
}

impl ProcessContext {
    pub(crate) fn new(
        instance: Arc<ComponentInstance>,
        step: u64,
        runtime_data: RuntimeData,
        handle: AgentHandle,
    ) -> Self {
        Self {
            instance,
            step,
            runtime_data,
            handle,
            keep_active: false,
            loop_body: false,
            loop_finished: false,
            spawned_jobs: Vec::new(),
        }
    }

    pub fn id(&self) -> &ComponentId {
        &self.instance.id
    }

    pub fn instance(&self) -> &ComponentInstance {
        &self.instance
    }

    pub fn config(&self) -> &Value {
        &self.instance.config
    }

    /// Current tick of the session
    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn runtime_data(&self) -> &RuntimeData {
        &self.runtime_data
    }

    pub fn runtime_data_mut(&mut self) -> &mut RuntimeData {
        &mut self.runtime_data
    }

    /// Stay active and fire again next tick, on whatever input arrives meanwhile
    pub fn keep_active(&mut self) {
        self.keep_active = true;
    }

    /// Components fed by this output run inside this component's loop body
    pub fn enter_loop_body(&mut self) {
        self.loop_body = true;
    }

    /// This invocation closed the loop owned by the component
    pub fn finish_loop(&mut self) {
        self.loop_finished = true;
    }

    pub fn handle(&self) -> &AgentHandle {
        &self.handle
    }

    pub fn connector(&self, kind: &str, name: &str) -> Result<Arc<dyn Connector>, ComponentError> {
        Ok(self.handle.connector(kind, name)?)
    }

    /// Fork the sub-graph rooted at `target`; the job is tracked by the session
    pub async fn fork(
        &mut self,
        target: &ComponentId,
        input: Map<String, Value>,
    ) -> Result<String, ComponentError> {
        let job_id = self
            .handle
            .fork(target, input)
            .await
            .map_err(|e| ComponentError::runtime(e.to_string()))?;
        self.spawned_jobs.push(job_id.clone());
        Ok(job_id)
    }

    pub(crate) fn into_effects(self) -> InvocationEffects {
        InvocationEffects {
            runtime_data: self.runtime_data,
            keep_active: self.keep_active,
            loop_body: self.loop_body,
            loop_finished: self.loop_finished,
            spawned_jobs: self.spawned_jobs,
        }
    }
}
