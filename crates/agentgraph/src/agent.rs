//! Agent - the request-facing surface of a compiled agent graph
//!
//! An [`Agent`] resolves a request's endpoint, opens (or resumes) a session
//! and either runs it to completion or, in debug mode, advances it one tick
//! per call and reports what changed.
//!
//! # Example
//!
//! ```ignore
//! let agent = Agent::builder(graph)
//!     .with_registry(registry)
//!     .with_config(EngineConfig::default().with_debug(true))
//!     .build()?;
//!
//! let outcome = agent.process("/run", json!({"items": [1, 2, 3]})).await?;
//! if let AgentOutcome::Step(delta) = outcome {
//!     let next = agent.step(&delta.session_id).await?;
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::component::ComponentRegistry;
use crate::connector::ConnectorLocator;
use crate::engine::context::{CallCounters, RunContext};
use crate::engine::jobs::JobRegistry;
use crate::engine::scheduler::{RuntimeServices, Scheduler};
use crate::engine::snapshot::{RunOutput, RuntimeState, SessionKey, Snapshot};
use crate::engine::store::SnapshotStore;
use crate::engine::{EngineConfig, EngineError};
use crate::graph::visualization::{to_mermaid, to_mermaid_with_state};
use crate::graph::{AgentGraph, ComponentId};

fn default_method() -> String {
    "POST".to_string()
}

/// A client request against an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub path: String,

    #[serde(default = "default_method")]
    pub method: String,

    /// Request body handed to the endpoint
    #[serde(default)]
    pub input: Value,

    /// Resume or name a session; a new id is generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl AgentRequest {
    pub fn new(path: impl Into<String>, input: Value) -> Self {
        Self {
            path: path.into(),
            method: default_method(),
            input,
            session_id: None,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// What one debug step did to a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDelta {
    pub session_id: String,
    pub step: u64,
    pub fired: Vec<ComponentId>,
    pub waiting: Vec<ComponentId>,

    /// Runtime states that differ from before the step
    pub changed: BTreeMap<ComponentId, RuntimeState>,

    pub session_closed: bool,

    /// Final result once the session closed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RunOutput>,
}

/// Result of a request
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutcome {
    Completed(RunOutput),
    Step(StepDelta),
}

impl AgentOutcome {
    pub fn session_id(&self) -> &str {
        match self {
            AgentOutcome::Completed(output) => &output.session_id,
            AgentOutcome::Step(delta) => &delta.session_id,
        }
    }

    /// The final result, if the session closed
    pub fn into_output(self) -> Option<RunOutput> {
        match self {
            AgentOutcome::Completed(output) => Some(output),
            AgentOutcome::Step(delta) => delta.result,
        }
    }
}

/// Builder for [`Agent`]
pub struct AgentBuilder {
    graph: AgentGraph,
    config: EngineConfig,
    registry: ComponentRegistry,
    services: RuntimeServices,
}

impl AgentBuilder {
    pub fn new(graph: AgentGraph) -> Self {
        Self {
            graph,
            config: EngineConfig::default(),
            registry: ComponentRegistry::new(),
            services: RuntimeServices::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_registry(mut self, registry: ComponentRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.services.store = store;
        self
    }

    pub fn with_jobs(mut self, jobs: Arc<dyn JobRegistry>) -> Self {
        self.services.jobs = jobs;
        self
    }

    /// Share circular-call counters with other agents of the same process
    pub fn with_counters(mut self, counters: Arc<CallCounters>) -> Self {
        self.services.counters = counters;
        self
    }

    pub fn with_connectors(mut self, connectors: Arc<dyn ConnectorLocator>) -> Self {
        self.services.connectors = connectors;
        self
    }

    pub fn build(self) -> Result<Agent, EngineError> {
        let scheduler = Scheduler::compile(
            Arc::new(self.graph),
            Arc::new(self.registry),
            self.config,
            self.services,
        )?;
        Ok(Agent {
            scheduler: Arc::new(scheduler),
            sessions: Mutex::new(HashMap::new()),
        })
    }
}

/// A runnable agent
pub struct Agent {
    scheduler: Arc<Scheduler>,
    /// Cancellation tokens of sessions with a run in flight
    sessions: Mutex<HashMap<String, CancellationToken>>,
}

impl Agent {
    pub fn builder(graph: AgentGraph) -> AgentBuilder {
        AgentBuilder::new(graph)
    }

    /// Agent with built-in components only and in-memory services
    pub fn new(graph: AgentGraph) -> Result<Self, EngineError> {
        AgentBuilder::new(graph).build()
    }

    pub fn id(&self) -> &str {
        self.scheduler.graph().id()
    }

    pub fn graph(&self) -> &AgentGraph {
        self.scheduler.graph()
    }

    pub fn config(&self) -> &EngineConfig {
        self.scheduler.config()
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn key(&self, session_id: &str) -> SessionKey {
        SessionKey::new(self.id(), session_id)
    }

    /// Find the endpoint component serving `path` and `method`
    pub fn resolve_endpoint(&self, path: &str, method: &str) -> Result<ComponentId, EngineError> {
        self.graph()
            .find_endpoint(path, method)
            .cloned()
            .ok_or_else(|| EngineError::endpoint_not_found(path, method.to_uppercase()))
    }

    /// `POST` a JSON body to `path`
    pub async fn process(&self, path: &str, input: Value) -> Result<AgentOutcome, EngineError> {
        self.process_request(AgentRequest::new(path, input)).await
    }

    pub async fn process_request(&self, request: AgentRequest) -> Result<AgentOutcome, EngineError> {
        let entry = self.resolve_endpoint(&request.path, &request.method)?;
        let session_id = request
            .session_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let existing = self
            .scheduler
            .store()
            .load(&self.key(&session_id))
            .await?
            .filter(|snapshot| !snapshot.closed);

        let mut run = self.open_run(&session_id);
        let mut snapshot = match existing {
            Some(snapshot) => {
                tracing::info!(session_id = %session_id, step = snapshot.step, "Session resumed");
                self.scheduler
                    .counters()
                    .seed(&session_id, &snapshot.invocations);
                run = run.with_workflow_id(snapshot.workflow_id.clone());
                snapshot
            }
            None => {
                tracing::info!(
                    session_id = %session_id,
                    path = %request.path,
                    entry = %entry,
                    "Session opened"
                );
                self.scheduler.new_snapshot(&run)
            }
        };
        self.scheduler.seed_entry(&mut snapshot, &entry, request.input);

        if self.config().debug {
            self.step_snapshot(snapshot, run).await.map(AgentOutcome::Step)
        } else {
            self.complete(snapshot, run).await.map(AgentOutcome::Completed)
        }
    }

    /// Advance a debug session by one tick
    pub async fn step(&self, session_id: &str) -> Result<StepDelta, EngineError> {
        let snapshot = self
            .scheduler
            .store()
            .load(&self.key(session_id))
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;

        if snapshot.closed && snapshot.killed {
            return Err(EngineError::killed(session_id, snapshot.partial_results()));
        }
        if snapshot.closed {
            return Ok(StepDelta {
                session_id: session_id.to_string(),
                step: snapshot.step,
                fired: Vec::new(),
                waiting: Vec::new(),
                changed: BTreeMap::new(),
                session_closed: true,
                result: Some(RunOutput::from_snapshot(&snapshot)),
            });
        }

        tracing::info!(session_id = %session_id, step = snapshot.step, "Snapshot restored");
        self.scheduler
            .counters()
            .seed(session_id, &snapshot.invocations);
        let run = self
            .open_run(session_id)
            .with_workflow_id(snapshot.workflow_id.clone());
        self.step_snapshot(snapshot, run).await
    }

    /// Kill a session: cancel its run in flight and mark its snapshot.
    ///
    /// Returns `false` when there was nothing to kill.
    pub async fn kill(&self, session_id: &str) -> Result<bool, EngineError> {
        let live = match self.lock_sessions().remove(session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        };

        let key = self.key(session_id);
        let store = self.scheduler.store();
        if let Some(mut snapshot) = store.load(&key).await? {
            if !snapshot.closed && !snapshot.killed {
                snapshot.killed = true;
                snapshot.touch();
                store.save(&key, &snapshot).await?;
                tracing::info!(session_id = %session_id, "Session marked killed");
                return Ok(true);
            }
        }
        Ok(live)
    }

    /// Stored snapshot of a session
    pub async fn session(&self, session_id: &str) -> Result<Option<Snapshot>, EngineError> {
        self.scheduler.store().load(&self.key(session_id)).await
    }

    /// Ids of the stored sessions of this agent
    pub async fn sessions(&self) -> Result<Vec<String>, EngineError> {
        self.scheduler.store().list(self.id()).await
    }

    /// Mermaid diagram of the agent graph
    pub fn mermaid(&self) -> String {
        to_mermaid(self.graph())
    }

    /// Mermaid diagram coloured by a session's component status
    pub async fn session_mermaid(&self, session_id: &str) -> Result<String, EngineError> {
        let snapshot = self
            .session(session_id)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;
        Ok(to_mermaid_with_state(self.graph(), &snapshot))
    }

    fn open_run(&self, session_id: &str) -> RunContext {
        let token = CancellationToken::new();
        self.lock_sessions()
            .insert(session_id.to_string(), token.clone());
        RunContext::new(self.id(), session_id).with_cancel(token)
    }

    fn release(&self, session_id: &str) {
        self.lock_sessions().remove(session_id);
    }

    async fn complete(&self, mut snapshot: Snapshot, run: RunContext) -> Result<RunOutput, EngineError> {
        let result = self.scheduler.run_to_completion(&mut snapshot, &run).await;
        self.release(&run.process_id);

        let killed = matches!(result, Err(EngineError::Killed { .. }));
        if !self.config().retain_closed_sessions && !killed {
            self.scheduler.store().delete(&snapshot.key()).await?;
        }
        result
    }

    async fn step_snapshot(&self, mut snapshot: Snapshot, run: RunContext) -> Result<StepDelta, EngineError> {
        let before = snapshot.states.clone();
        let result = self.scheduler.run_cycle(&mut snapshot, &run).await;
        self.release(&run.process_id);
        let report = result?;

        let changed = snapshot
            .states
            .iter()
            .filter(|(id, state)| before.get(*id) != Some(*state))
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect();

        let result = report.closed.then(|| RunOutput::from_snapshot(&snapshot));
        if report.closed && !self.config().retain_closed_sessions {
            self.scheduler.store().delete(&snapshot.key()).await?;
        }

        Ok(StepDelta {
            session_id: run.process_id,
            step: report.step,
            fired: report.fired,
            waiting: report.waiting,
            changed,
            session_closed: report.closed,
            result,
        })
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ComponentDefinition;
    use serde_json::json;

    fn echo_graph() -> AgentGraph {
        AgentGraph::builder("echo")
            .component(
                ComponentDefinition::new("ep", "endpoint")
                    .with_config(json!({"path": "/echo", "method": "POST"}))
                    .output("msg"),
            )
            .component(ComponentDefinition::new("out", "passthrough").input("msg"))
            .connect("ep", "msg", "out", "msg")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_process_completes() {
        let agent = Agent::new(echo_graph()).unwrap();
        let outcome = agent.process("/echo", json!({"msg": "hi"})).await.unwrap();
        let output = outcome.into_output().unwrap();
        assert_eq!(output.output, json!({"msg": "hi"}));

        assert!(agent.sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_endpoint_not_found() {
        let agent = Agent::new(echo_graph()).unwrap();
        let err = agent.process("/missing", json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "Endpoint Not Found: POST /missing");

        let err = agent
            .process_request(AgentRequest::new("/echo", json!({})).with_method("get"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::EndpointNotFound { .. }));
    }

    #[tokio::test]
    async fn test_request_deserializes_with_defaults() {
        let request: AgentRequest = serde_json::from_value(json!({"path": "/echo"})).unwrap();
        assert_eq!(request.method, "POST");
        assert_eq!(request.input, Value::Null);
        assert!(request.session_id.is_none());
    }

    #[tokio::test]
    async fn test_retained_session_is_listed() {
        let agent = Agent::builder(echo_graph())
            .with_config(EngineConfig::default().with_retain_closed_sessions(true))
            .build()
            .unwrap();
        agent
            .process_request(AgentRequest::new("/echo", json!({"msg": 1})).with_session("s1"))
            .await
            .unwrap();

        assert_eq!(agent.sessions().await.unwrap(), vec!["s1"]);
        let snapshot = agent.session("s1").await.unwrap().unwrap();
        assert!(snapshot.closed);
        assert!(agent.session_mermaid("s1").await.unwrap().contains(":::done"));
    }

    #[tokio::test]
    async fn test_step_unknown_session() {
        let agent = Agent::new(echo_graph()).unwrap();
        let err = agent.step("nope").await.unwrap_err();
        assert!(matches!(err, EngineError::SessionNotFound(_)));
    }
}
