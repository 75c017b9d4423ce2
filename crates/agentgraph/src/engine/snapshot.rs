//! Execution snapshots
//!
//! A [`Snapshot`] is the complete, serializable scheduling state of one
//! session: the [`RuntimeState`] of every component, the step counter, the
//! leaf and error results collected so far, and the forked jobs still
//! outstanding. Persisting it after every tick lets a session be resumed by
//! a later client call, or by another process when a durable
//! [`SnapshotStore`](super::store::SnapshotStore) is used.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

use crate::graph::ComponentId;

/// Scheduling status of a component within a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    #[default]
    Idle,
    /// Active but missing required inputs
    Waiting,
    /// Ready to fire, or kept active across ticks
    InProgress,
    Done,
    Failed,
}

/// Iteration state of a `for_each` loop
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopState {
    pub index: usize,
    pub length: usize,
    pub items: Vec<Value>,
    pub results: Vec<Value>,

    /// Item lists that arrived while this loop was running
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub queued: Vec<Vec<Value>>,
}

impl LoopState {
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            index: 0,
            length: items.len(),
            items,
            results: Vec::new(),
            queued: Vec::new(),
        }
    }

    /// Take the next element, advancing the index
    pub fn advance(&mut self) -> Option<(usize, Value)> {
        let index = self.index;
        let item = self.items.get(index)?.clone();
        self.index += 1;
        Some((index, item))
    }

    /// Every element has been emitted
    pub fn is_exhausted(&self) -> bool {
        self.index >= self.length
    }

    /// Collected results, and the loop over the next queued item list
    pub fn finish(self) -> (Vec<Value>, Option<LoopState>) {
        let mut queued = self.queued.into_iter();
        let follow_up = queued.next().map(|items| {
            let mut state = LoopState::new(items);
            state.queued = queued.collect();
            state
        });
        (self.results, follow_up)
    }
}

/// Free-form per-component state that survives between ticks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_state: Option<LoopState>,

    /// The loop whose body this component currently runs in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_loop: Option<ComponentId>,

    /// Component-defined state
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl RuntimeData {
    pub fn is_empty(&self) -> bool {
        self.loop_state.is_none() && self.child_loop.is_none() && self.extra.is_empty()
    }
}

/// Mutable per-session state of one component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeState {
    pub active: bool,
    pub status: ComponentStatus,

    /// Accumulated input, keyed by input port name
    #[serde(default)]
    pub input: Map<String, Value>,

    /// Last output the component produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    /// Tick in which the component last fired
    pub step: u64,

    #[serde(default)]
    pub runtime_data: RuntimeData,
}

impl RuntimeState {
    /// Inactive with no carried state
    pub fn is_quiesced(&self) -> bool {
        !self.active && self.runtime_data.is_empty()
    }
}

/// A result collected from a leaf component, or an error output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafResult {
    pub component_id: ComponentId,
    pub kind: String,
    pub output: Value,
    pub step: u64,
    pub is_leaf: bool,
}

impl LeafResult {
    pub fn leaf(
        component_id: impl Into<ComponentId>,
        kind: impl Into<String>,
        output: Value,
        step: u64,
    ) -> Self {
        Self {
            component_id: component_id.into(),
            kind: kind.into(),
            output,
            step,
            is_leaf: true,
        }
    }
}

/// The first component that exceeded the circular-call limit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircularBreach {
    pub component_id: ComponentId,
    pub limit: u32,
    pub count: u32,
}

/// Store key of a session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub agent_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(agent_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id: session_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.agent_id, self.session_id)
    }
}

/// Complete scheduling state of one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub agent_id: String,

    /// Client-visible session id; also the circular-counter tag
    pub process_id: String,

    /// Identifier of this logical run
    pub workflow_id: String,

    pub step: u64,

    pub states: HashMap<ComponentId, RuntimeState>,

    /// Distinct leaf results, first occurrence per component
    #[serde(default)]
    pub leaves: Vec<LeafResult>,

    /// Distinct error outputs, first occurrence per component
    #[serde(default)]
    pub errors: Vec<LeafResult>,

    /// Forked jobs created by this run that were not yet observed terminal
    #[serde(default)]
    pub pending_jobs: Vec<String>,

    /// Invocation counts of this run's tag when last persisted
    #[serde(default)]
    pub invocations: HashMap<ComponentId, u32>,

    #[serde(default)]
    pub closed: bool,

    #[serde(default)]
    pub killed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breach: Option<CircularBreach>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Snapshot {
    /// Create a snapshot with an idle state for every listed component
    pub fn new<'a>(
        agent_id: impl Into<String>,
        process_id: impl Into<String>,
        workflow_id: impl Into<String>,
        components: impl IntoIterator<Item = &'a ComponentId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            agent_id: agent_id.into(),
            process_id: process_id.into(),
            workflow_id: workflow_id.into(),
            step: 0,
            states: components
                .into_iter()
                .map(|id| (id.clone(), RuntimeState::default()))
                .collect(),
            leaves: Vec::new(),
            errors: Vec::new(),
            pending_jobs: Vec::new(),
            invocations: HashMap::new(),
            closed: false,
            killed: false,
            breach: None,
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        }
    }

    /// Add metadata to this snapshot
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.agent_id.clone(), self.process_id.clone())
    }

    pub fn state(&self, id: &ComponentId) -> Option<&RuntimeState> {
        self.states.get(id)
    }

    pub fn state_mut(&mut self, id: &ComponentId) -> &mut RuntimeState {
        self.states.entry(id.clone()).or_default()
    }

    /// Ids of active components
    pub fn active_components(&self) -> impl Iterator<Item = &ComponentId> {
        self.states.iter().filter(|(_, s)| s.active).map(|(id, _)| id)
    }

    /// Record a leaf result; later results of the same component are dropped
    pub fn record_leaf(&mut self, result: LeafResult) -> bool {
        if self.leaves.iter().any(|r| r.component_id == result.component_id) {
            return false;
        }
        self.leaves.push(result);
        true
    }

    /// Record an error output; later errors of the same component are dropped
    pub fn record_error(&mut self, result: LeafResult) -> bool {
        if self.errors.iter().any(|r| r.component_id == result.component_id) {
            return false;
        }
        self.errors.push(result);
        true
    }

    /// Results to report when the session is interrupted
    pub fn partial_results(&self) -> Vec<LeafResult> {
        self.leaves.clone()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Final result of a closed session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutput {
    pub session_id: String,
    pub workflow_id: String,
    pub steps: u64,

    /// One leaf: its output. Several: their outputs in first-occurrence
    /// order. None: the error outputs, the same way.
    pub output: Value,

    pub leaves: Vec<LeafResult>,
    pub errors: Vec<LeafResult>,
}

impl RunOutput {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let source = if snapshot.leaves.is_empty() {
            &snapshot.errors
        } else {
            &snapshot.leaves
        };
        let output = match source.as_slice() {
            [] => Value::Null,
            [single] => single.output.clone(),
            many => Value::Array(many.iter().map(|r| r.output.clone()).collect()),
        };

        Self {
            session_id: snapshot.process_id.clone(),
            workflow_id: snapshot.workflow_id.clone(),
            steps: snapshot.step,
            output,
            leaves: snapshot.leaves.clone(),
            errors: snapshot.errors.clone(),
        }
    }

    /// The session produced no successful leaf
    pub fn is_error(&self) -> bool {
        self.leaves.is_empty() && !self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot() -> Snapshot {
        let ids = [ComponentId::from("a"), ComponentId::from("b")];
        Snapshot::new("agent", "proc-1", "wf-1", ids.iter())
    }

    #[test]
    fn test_new_snapshot_has_idle_states() {
        let snap = snapshot();
        assert_eq!(snap.states.len(), 2);
        assert!(snap.states.values().all(|s| s.is_quiesced()));
        assert_eq!(snap.key(), SessionKey::new("agent", "proc-1"));
        assert_eq!(snap.key().to_string(), "agent/proc-1");
    }

    #[test]
    fn test_leaf_dedup_first_wins() {
        let mut snap = snapshot();
        assert!(snap.record_leaf(LeafResult::leaf("a", "x", json!(1), 1)));
        assert!(!snap.record_leaf(LeafResult::leaf("a", "x", json!(2), 2)));
        assert!(snap.record_leaf(LeafResult::leaf("b", "x", json!(3), 2)));

        assert_eq!(snap.leaves.len(), 2);
        assert_eq!(snap.leaves[0].output, json!(1));
    }

    #[test]
    fn test_run_output_single_and_many() {
        let mut snap = snapshot();
        snap.record_leaf(LeafResult::leaf("a", "x", json!({"v": 1}), 1));
        assert_eq!(RunOutput::from_snapshot(&snap).output, json!({"v": 1}));

        snap.record_leaf(LeafResult::leaf("b", "x", json!({"v": 2}), 1));
        assert_eq!(
            RunOutput::from_snapshot(&snap).output,
            json!([{"v": 1}, {"v": 2}])
        );
    }

    #[test]
    fn test_run_output_falls_back_to_errors() {
        let mut snap = snapshot();
        let mut err = LeafResult::leaf("a", "x", json!({"_error": {"message": "boom"}}), 1);
        err.is_leaf = false;
        snap.record_error(err);

        let output = RunOutput::from_snapshot(&snap);
        assert!(output.is_error());
        assert_eq!(output.output["_error"]["message"], "boom");
    }

    #[test]
    fn test_loop_state_progress() {
        let mut state = LoopState::new(vec![json!(1), json!(2)]);
        assert_eq!(state.advance(), Some((0, json!(1))));
        assert!(!state.is_exhausted());
        assert_eq!(state.advance(), Some((1, json!(2))));
        assert!(state.is_exhausted());
        assert_eq!(state.advance(), None);
    }

    #[test]
    fn test_loop_state_finish_starts_queued_items() {
        let mut state = LoopState::new(vec![json!(1)]);
        state.results.push(json!("a"));
        state.queued = vec![vec![json!(2), json!(3)], vec![json!(4)]];

        let (results, follow_up) = state.finish();
        assert_eq!(results, vec![json!("a")]);

        let follow_up = follow_up.expect("queued items start a new loop");
        assert_eq!(follow_up.length, 2);
        assert_eq!(follow_up.index, 0);
        assert!(follow_up.results.is_empty());
        assert_eq!(follow_up.queued, vec![vec![json!(4)]]);

        let (_, last) = LoopState::new(vec![]).finish();
        assert!(last.is_none());
    }

    #[test]
    fn test_runtime_data_serialization_skips_empty() {
        let state = RuntimeState::default();
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["runtime_data"], json!({}));
        assert_eq!(json["status"], "idle");
    }
}
