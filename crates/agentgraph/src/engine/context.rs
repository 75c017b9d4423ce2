//! Run context and shared counters
//!
//! [`RunContext`] carries the identity and cancellation of one run and is
//! passed explicitly through the scheduler. [`CallCounters`] enforce the
//! circular-call limit per request tag and are shared by a run and every run
//! forked from it. [`AgentHandle`] is what a component sees of the runtime.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use super::config::EngineConfig;
use super::error::EngineError;
use super::jobs::JobRegistry;
use super::scheduler::Scheduler;
use crate::connector::{Connector, ConnectorError};
use crate::graph::{AgentGraph, ComponentId};

/// Identity and cancellation of one run
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Root agent id; namespace of the job registry
    pub agent_id: String,

    /// Request tag shared with forked children
    pub process_id: String,

    /// Identifier of this logical run
    pub workflow_id: String,

    pub cancel: CancellationToken,

    /// False for forked runs
    pub root: bool,
}

impl RunContext {
    pub fn new(agent_id: impl Into<String>, process_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            process_id: process_id.into(),
            workflow_id: uuid::Uuid::new_v4().to_string(),
            cancel: CancellationToken::new(),
            root: true,
        }
    }

    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = workflow_id.into();
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Context of a detached child run: same tag, new workflow id, and a
    /// cancellation token that follows the parent's
    pub fn forked(&self) -> Self {
        Self {
            agent_id: self.agent_id.clone(),
            process_id: self.process_id.clone(),
            workflow_id: uuid::Uuid::new_v4().to_string(),
            cancel: self.cancel.child_token(),
            root: false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Counts of one request tag, plus the forked runs still holding it
#[derive(Debug, Default)]
struct TagCounters {
    counts: HashMap<ComponentId, u32>,
    forks: usize,
    root_closed: bool,
}

/// Invocation counts per request tag and component.
///
/// A tag is released when the last run using it ends: the root run on
/// close, or the last forked run still in flight after that.
#[derive(Debug, Default)]
pub struct CallCounters {
    tags: Mutex<HashMap<String, TagCounters>>,
}

impl CallCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TagCounters>> {
        self.tags.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Count one invocation and return the new total
    pub fn increment(&self, tag: &str, component: &ComponentId) -> u32 {
        let mut tags = self.lock();
        let count = tags
            .entry(tag.to_string())
            .or_default()
            .counts
            .entry(component.clone())
            .or_insert(0);
        *count += 1;
        *count
    }

    pub fn get(&self, tag: &str, component: &ComponentId) -> u32 {
        self.lock()
            .get(tag)
            .and_then(|t| t.counts.get(component))
            .copied()
            .unwrap_or(0)
    }

    /// All counts of a tag
    pub fn snapshot(&self, tag: &str) -> HashMap<ComponentId, u32> {
        self.lock()
            .get(tag)
            .map(|t| t.counts.clone())
            .unwrap_or_default()
    }

    /// Whether anything is held under `tag`
    pub fn contains(&self, tag: &str) -> bool {
        self.lock().contains_key(tag)
    }

    /// Restore persisted counts; existing higher counts are kept
    pub fn seed(&self, tag: &str, persisted: &HashMap<ComponentId, u32>) {
        let mut tags = self.lock();
        let entry = tags.entry(tag.to_string()).or_default();
        entry.root_closed = false;
        for (component, &count) in persisted {
            let current = entry.counts.entry(component.clone()).or_insert(0);
            *current = (*current).max(count);
        }
    }

    /// A forked run starts counting under `tag`
    pub fn retain_fork(&self, tag: &str) {
        self.lock().entry(tag.to_string()).or_default().forks += 1;
    }

    /// A forked run ended; the tag goes once its root is closed too
    pub fn release_fork(&self, tag: &str) {
        let mut tags = self.lock();
        if let Some(entry) = tags.get_mut(tag) {
            entry.forks = entry.forks.saturating_sub(1);
            if entry.forks == 0 && entry.root_closed {
                tags.remove(tag);
            }
        }
    }

    /// The root run closed; the tag goes now unless forks still hold it
    pub fn release_root(&self, tag: &str) {
        let mut tags = self.lock();
        match tags.get_mut(tag) {
            Some(entry) if entry.forks > 0 => entry.root_closed = true,
            Some(_) => {
                tags.remove(tag);
            }
            None => {}
        }
    }
}

/// The runtime as seen from inside a component invocation
#[derive(Clone)]
pub struct AgentHandle {
    scheduler: Arc<Scheduler>,
    run: RunContext,
}

impl AgentHandle {
    pub(crate) fn new(scheduler: Arc<Scheduler>, run: RunContext) -> Self {
        Self { scheduler, run }
    }

    pub fn run(&self) -> &RunContext {
        &self.run
    }

    /// Root agent id, the job namespace
    pub fn agent_id(&self) -> &str {
        &self.run.agent_id
    }

    pub fn graph(&self) -> &AgentGraph {
        self.scheduler.graph()
    }

    pub fn config(&self) -> &EngineConfig {
        self.scheduler.config()
    }

    pub fn jobs(&self) -> &Arc<dyn JobRegistry> {
        self.scheduler.jobs()
    }

    pub fn connector(&self, kind: &str, name: &str) -> Result<Arc<dyn Connector>, ConnectorError> {
        self.scheduler.connectors().get_connector(kind, name)
    }

    /// Run the sub-graph rooted at `target` as a detached job
    pub async fn fork(
        &self,
        target: &ComponentId,
        input: Map<String, Value>,
    ) -> Result<String, EngineError> {
        self.scheduler.spawn_fork(&self.run, target, input).await
    }

    pub fn is_cancelled(&self) -> bool {
        self.run.is_cancelled()
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("agent", &self.scheduler.graph().id())
            .field("run", &self.run)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_per_tag() {
        let counters = CallCounters::new();
        let a = ComponentId::from("a");

        assert_eq!(counters.increment("t1", &a), 1);
        assert_eq!(counters.increment("t1", &a), 2);
        assert_eq!(counters.increment("t2", &a), 1);
        assert_eq!(counters.get("t1", &a), 2);

        counters.release_root("t1");
        assert_eq!(counters.get("t1", &a), 0);
        assert_eq!(counters.get("t2", &a), 1);
    }

    #[test]
    fn test_root_release_waits_for_forks() {
        let counters = CallCounters::new();
        let a = ComponentId::from("a");

        counters.increment("t", &a);
        counters.retain_fork("t");
        counters.release_root("t");
        assert!(counters.contains("t"));

        // The orphaned fork keeps counting until it ends
        assert_eq!(counters.increment("t", &a), 2);
        counters.release_fork("t");
        assert!(!counters.contains("t"));
    }

    #[test]
    fn test_fork_release_keeps_open_root() {
        let counters = CallCounters::new();
        let a = ComponentId::from("a");

        counters.increment("t", &a);
        counters.retain_fork("t");
        counters.release_fork("t");
        assert_eq!(counters.get("t", &a), 1);

        counters.release_root("t");
        assert!(!counters.contains("t"));
    }

    #[test]
    fn test_counters_seed_keeps_max() {
        let counters = CallCounters::new();
        let a = ComponentId::from("a");
        counters.increment("t", &a);
        counters.increment("t", &a);

        let persisted = HashMap::from([(a.clone(), 1), (ComponentId::from("b"), 4)]);
        counters.seed("t", &persisted);

        assert_eq!(counters.get("t", &a), 2);
        assert_eq!(counters.get("t", &"b".into()), 4);
    }

    #[test]
    fn test_counters_shared_across_threads() {
        let counters = Arc::new(CallCounters::new());
        let id = ComponentId::from("x");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counters = counters.clone();
                let id = id.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        counters.increment("tag", &id);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counters.get("tag", &id), 800);
    }

    #[test]
    fn test_forked_context() {
        let parent = RunContext::new("agent", "proc");
        let child = parent.forked();

        assert_eq!(child.process_id, "proc");
        assert_ne!(child.workflow_id, parent.workflow_id);
        assert!(!child.root);

        parent.cancel.cancel();
        assert!(child.is_cancelled());
    }
}
