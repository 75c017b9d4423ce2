//! Scheduler - tick-based interpreter for agent graphs
//!
//! Each tick (`run_cycle`) fires the active components whose inputs are
//! satisfied and propagates their outputs through a worklist, batch by
//! batch, until the wave settles:
//!
//! ```text
//! select active ──► ready? ──► invoke batch ──► route outputs ──► next batch
//!                     │                                              │
//!                     └── waiting (missing inputs)      wave settled ─┴─► close? ──► persist
//! ```
//!
//! Circular-call counters are enforced on every invocation, forked jobs keep
//! a session open until they are observed terminal, and the snapshot is
//! saved after every tick.

use futures::future::join_all;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use super::config::EngineConfig;
use super::context::{AgentHandle, CallCounters, RunContext};
use super::error::EngineError;
use super::jobs::{JobRegistry, MemoryJobRegistry};
use super::snapshot::{
    CircularBreach, ComponentStatus, LeafResult, LoopState, RunOutput, SessionKey, Snapshot,
};
use super::store::{MemorySnapshotStore, SnapshotStore};
use crate::component::{
    Component, ComponentError, ComponentFlags, ComponentInput, ComponentRegistry,
    InvocationEffects, ProcessContext,
};
use crate::connector::{ConnectorLocator, ConnectorRegistry};
use crate::graph::{
    derive_fork_graph, error_of, merge_port_values, resolve_output, AgentGraph, ComponentId,
    ComponentInstance,
};

/// Shared services injected into every scheduler of an agent and its forks
#[derive(Clone)]
pub struct RuntimeServices {
    pub store: Arc<dyn SnapshotStore>,
    pub jobs: Arc<dyn JobRegistry>,
    pub counters: Arc<CallCounters>,
    pub connectors: Arc<dyn ConnectorLocator>,
}

impl Default for RuntimeServices {
    fn default() -> Self {
        Self {
            store: Arc::new(MemorySnapshotStore::new()),
            jobs: Arc::new(MemoryJobRegistry::new()),
            counters: Arc::new(CallCounters::new()),
            connectors: Arc::new(ConnectorRegistry::new()),
        }
    }
}

/// What happened during one tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Session step after the tick
    pub step: u64,
    /// Components invoked, in invocation order
    pub fired: Vec<ComponentId>,
    /// Components left waiting for inputs
    pub waiting: Vec<ComponentId>,
    pub closed: bool,
}

/// Result of one component invocation
struct Invocation {
    id: ComponentId,
    output: Value,
    failed: bool,
    /// `None` when the task panicked
    effects: Option<InvocationEffects>,
}

/// A value travelling along one connection
struct Delivery {
    connection: usize,
    target: ComponentId,
    port: String,
    value: Value,
    scope: Option<ComponentId>,
}

/// Compiled, runnable form of an agent graph
pub struct Scheduler {
    graph: Arc<AgentGraph>,
    components: HashMap<ComponentId, Arc<dyn Component>>,
    flags: HashMap<ComponentId, ComponentFlags>,
    registry: Arc<ComponentRegistry>,
    config: EngineConfig,
    services: RuntimeServices,
    permits: Arc<Semaphore>,
}

impl Scheduler {
    /// Resolve every component kind of `graph`
    pub fn compile(
        graph: Arc<AgentGraph>,
        registry: Arc<ComponentRegistry>,
        config: EngineConfig,
        services: RuntimeServices,
    ) -> Result<Self, EngineError> {
        let mut components = HashMap::with_capacity(graph.len());
        let mut flags = HashMap::with_capacity(graph.len());

        for instance in graph.components() {
            let kind = registry.resolve(&instance.kind).ok_or_else(|| {
                EngineError::UnknownComponentKind {
                    component_id: instance.id.clone(),
                    kind: instance.kind.clone(),
                }
            })?;
            let component = kind.into_component();
            flags.insert(instance.id.clone(), component.flags());
            components.insert(instance.id.clone(), component);
        }

        let permits = Arc::new(Semaphore::new(config.parallelism.max(1)));
        Ok(Self {
            graph,
            components,
            flags,
            registry,
            config,
            services,
            permits,
        })
    }

    /// Compile another graph with the same registry, config and services
    pub fn derive(&self, graph: AgentGraph) -> Result<Self, EngineError> {
        Self::compile(
            Arc::new(graph),
            self.registry.clone(),
            self.config.clone(),
            self.services.clone(),
        )
    }

    pub fn graph(&self) -> &AgentGraph {
        &self.graph
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.services.store
    }

    pub fn jobs(&self) -> &Arc<dyn JobRegistry> {
        &self.services.jobs
    }

    pub fn counters(&self) -> &Arc<CallCounters> {
        &self.services.counters
    }

    pub fn connectors(&self) -> &Arc<dyn ConnectorLocator> {
        &self.services.connectors
    }

    /// Circular limit of this agent: the definition's, else the config's
    pub fn circular_limit(&self) -> u32 {
        self.graph
            .circular_limit()
            .unwrap_or(self.config.circular_limit)
            .max(1)
    }

    fn flags(&self, id: &ComponentId) -> ComponentFlags {
        self.flags.get(id).copied().unwrap_or_default()
    }

    /// Store key of a run's snapshot; forked runs are keyed by workflow id
    pub fn store_key(&self, snapshot: &Snapshot, run: &RunContext) -> SessionKey {
        if run.root {
            snapshot.key()
        } else {
            SessionKey::new(snapshot.agent_id.clone(), run.workflow_id.clone())
        }
    }

    /// Fresh snapshot with always-active components switched on
    pub fn new_snapshot(&self, run: &RunContext) -> Snapshot {
        let mut snapshot = Snapshot::new(
            self.graph.id(),
            run.process_id.clone(),
            run.workflow_id.clone(),
            self.graph.component_ids(),
        );
        for id in self.graph.component_ids() {
            if self.flags(id).always_active {
                snapshot.state_mut(id).active = true;
            }
        }
        snapshot
    }

    /// Hand a request body to an entry component and activate it.
    ///
    /// Object bodies become the entry's input as-is; any other non-null body
    /// is wrapped as `{"body": ..}`.
    pub fn seed_entry(&self, snapshot: &mut Snapshot, entry: &ComponentId, body: Value) {
        let input = match body {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("body".to_string(), other);
                map
            }
        };
        let state = snapshot.state_mut(entry);
        state.input.extend(input);
        state.active = true;
        state.status = ComponentStatus::InProgress;
    }

    // ========================================================================
    // Input resolution
    // ========================================================================

    fn upstream_readable(&self, snapshot: &Snapshot, target: &ComponentId, port: usize) -> bool {
        self.graph.incoming(target, port).any(|connection| {
            match (
                self.components.get(&connection.source),
                self.graph.component(&connection.source),
                snapshot.state(&connection.source),
            ) {
                (Some(component), Some(source), Some(state)) => component.has_output(source, state),
                _ => false,
            }
        })
    }

    /// Required ports with no accumulated value, no default and no readable
    /// upstream component
    pub fn missing_inputs(&self, snapshot: &Snapshot, instance: &ComponentInstance) -> Vec<String> {
        let state = snapshot.state(&instance.id);
        instance
            .required_inputs()
            .filter(|port| {
                let present = state
                    .map(|s| s.input.contains_key(&port.name))
                    .unwrap_or(false);
                !present && !self.upstream_readable(snapshot, &instance.id, port.index)
            })
            .map(|port| port.name.clone())
            .collect()
    }

    /// Accumulated input completed from readable upstreams and defaults
    fn prepare_input(&self, snapshot: &Snapshot, instance: &ComponentInstance) -> ComponentInput {
        let mut input = snapshot
            .state(&instance.id)
            .map(|s| s.input.clone())
            .unwrap_or_default();

        for port in &instance.inputs {
            if input.contains_key(&port.name) {
                continue;
            }

            let pulled: Vec<Value> = self
                .graph
                .incoming(&instance.id, port.index)
                .filter_map(|connection| {
                    let component = self.components.get(&connection.source)?;
                    let source = self.graph.component(&connection.source)?;
                    let state = snapshot.state(&connection.source)?;
                    let source_port = source.outputs.get(connection.source_port)?;
                    component.read_output(source, &source_port.name, state)
                })
                .collect();

            if !pulled.is_empty() {
                input.insert(port.name.clone(), merge_port_values(pulled));
            } else if let Some(default) = &port.default {
                input.insert(port.name.clone(), default.clone());
            }
        }

        input
    }

    /// An always-active component with declared inputs only fires once
    /// something arrived
    fn has_work(&self, snapshot: &Snapshot, instance: &ComponentInstance) -> bool {
        if !self.flags(&instance.id).always_active || instance.inputs.is_empty() {
            return true;
        }
        snapshot
            .state(&instance.id)
            .map(|s| !s.input.is_empty())
            .unwrap_or(false)
    }

    // ========================================================================
    // Loops
    // ========================================================================

    /// A component scoped to `loop_id` is still running or queued
    fn body_busy(&self, snapshot: &Snapshot, loop_id: &ComponentId, queued: &[ComponentId]) -> bool {
        snapshot.states.iter().any(|(id, state)| {
            id != loop_id
                && state.runtime_data.child_loop.as_ref() == Some(loop_id)
                && !self.flags(id).always_active
                && (queued.contains(id)
                    || (state.active && state.status != ComponentStatus::Waiting))
        })
    }

    /// A running loop neither advances nor finalizes until its body is idle
    fn loop_blocked(&self, snapshot: &Snapshot, id: &ComponentId, queued: &[ComponentId]) -> bool {
        let running = snapshot
            .state(id)
            .map(|s| s.runtime_data.loop_state.is_some())
            .unwrap_or(false);
        running && self.body_busy(snapshot, id, queued)
    }

    /// Queue exhausted loops whose body went idle, so they finalize within
    /// the tick that delivered their last result
    fn queue_settled_loops(
        &self,
        snapshot: &mut Snapshot,
        exclusive_tick: bool,
        next: &mut Vec<ComponentId>,
    ) {
        for id in self.graph.component_ids() {
            if next.contains(id) || (exclusive_tick && !self.flags(id).exclusive) {
                continue;
            }
            let exhausted = snapshot
                .state(id)
                .filter(|s| s.active)
                .and_then(|s| s.runtime_data.loop_state.as_ref())
                .map(LoopState::is_exhausted)
                .unwrap_or(false);
            if exhausted && !self.body_busy(snapshot, id, next) {
                snapshot.state_mut(id).status = ComponentStatus::InProgress;
                next.push(id.clone());
            }
        }
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Active components in graph order, only exclusive ones if any is active
    fn select_active(&self, snapshot: &Snapshot) -> (Vec<ComponentId>, bool) {
        let active: Vec<ComponentId> = self
            .graph
            .component_ids()
            .iter()
            .filter(|id| snapshot.state(id).map(|s| s.active).unwrap_or(false))
            .cloned()
            .collect();

        let exclusive: Vec<ComponentId> = active
            .iter()
            .filter(|id| self.flags(id).exclusive)
            .cloned()
            .collect();

        if exclusive.is_empty() {
            (active, false)
        } else {
            (exclusive, true)
        }
    }

    /// Drop pending jobs that finished or were evicted
    async fn refresh_jobs(&self, snapshot: &mut Snapshot, run: &RunContext) -> Result<(), EngineError> {
        let pending = std::mem::take(&mut snapshot.pending_jobs);
        for job_id in pending {
            if let Some(record) = self.services.jobs.get(&run.agent_id, &job_id).await? {
                if !record.status.is_terminal() {
                    snapshot.pending_jobs.push(job_id);
                }
            }
        }
        Ok(())
    }

    /// Execute one tick of the session
    pub async fn run_cycle(
        self: &Arc<Self>,
        snapshot: &mut Snapshot,
        run: &RunContext,
    ) -> Result<CycleReport, EngineError> {
        let mut report = CycleReport {
            step: snapshot.step,
            ..Default::default()
        };

        if snapshot.closed {
            report.closed = true;
            return Ok(report);
        }

        if snapshot.killed || run.is_cancelled() {
            return Err(self.abort_killed(snapshot, run).await?);
        }

        self.refresh_jobs(snapshot, run).await?;

        let tick = snapshot.step + 1;
        let (selected, exclusive_tick) = self.select_active(snapshot);

        if selected.is_empty() && snapshot.pending_jobs.is_empty() {
            self.close(snapshot, run);
            report.closed = true;
            self.persist(snapshot, run).await?;
            return Ok(report);
        }

        let mut batch = Vec::new();
        for id in selected {
            let Some(instance) = self.graph.component(&id) else {
                continue;
            };
            if !self.has_work(snapshot, instance) {
                continue;
            }
            if self.loop_blocked(snapshot, &id, &[]) {
                tracing::debug!(component_id = %id, "Loop waiting for its body");
                continue;
            }
            // Kept active by its last invocation: fires on what arrived since
            let continuing = snapshot
                .state(&id)
                .map(|s| s.status == ComponentStatus::InProgress)
                .unwrap_or(false);
            let missing = self.missing_inputs(snapshot, instance);
            if continuing || missing.is_empty() {
                batch.push(id);
            } else {
                tracing::debug!(component_id = %id, ?missing, "Component waiting for inputs");
                snapshot.state_mut(&id).status = ComponentStatus::Waiting;
                report.waiting.push(id);
            }
        }

        let limit = self.circular_limit();
        let mut progressed = false;

        while !batch.is_empty() {
            for id in &batch {
                let count = self.services.counters.increment(&run.process_id, id);
                if count > limit {
                    return Err(self.abort_circular(snapshot, run, tick, id, limit, count).await?);
                }
            }

            let invocations = self.invoke_batch(snapshot, run, &batch, tick).await?;

            let mut deliveries = Vec::new();
            let mut next: Vec<ComponentId> = Vec::new();

            for invocation in invocations {
                if !self.flags(&invocation.id).always_active {
                    progressed = true;
                }
                report.fired.push(invocation.id.clone());
                self.apply_invocation(snapshot, invocation, tick, &mut deliveries);
            }

            if run.is_cancelled() {
                return Err(self.abort_killed(snapshot, run).await?);
            }

            self.deliver(snapshot, deliveries, exclusive_tick, &mut next, &mut report);
            self.queue_settled_loops(snapshot, exclusive_tick, &mut next);
            batch = next;
        }

        // Waiting on forked jobs alone does not count as a step
        if !report.fired.is_empty() || snapshot.pending_jobs.is_empty() {
            snapshot.step = tick;
        }
        report.step = snapshot.step;
        snapshot.invocations = self.services.counters.snapshot(&run.process_id);

        let open = self.graph.component_ids().iter().any(|id| {
            !self.flags(id).always_active && snapshot.state(id).map(|s| s.active).unwrap_or(false)
        });

        if snapshot.pending_jobs.is_empty() {
            if !open {
                self.close(snapshot, run);
                report.closed = true;
            } else if !progressed {
                let waiting: Vec<&ComponentId> = snapshot
                    .states
                    .iter()
                    .filter(|(_, s)| s.active && s.status == ComponentStatus::Waiting)
                    .map(|(id, _)| id)
                    .collect();
                tracing::warn!(
                    session_id = %snapshot.process_id,
                    step = tick,
                    ?waiting,
                    "Session stalled, closing"
                );
                self.close(snapshot, run);
                report.closed = true;
            }
        }

        tracing::debug!(
            session_id = %snapshot.process_id,
            step = tick,
            fired = report.fired.len(),
            waiting = report.waiting.len(),
            closed = report.closed,
            "Tick complete"
        );

        self.persist(snapshot, run).await?;
        Ok(report)
    }

    /// Invoke one batch concurrently, bounded by the parallelism permits
    async fn invoke_batch(
        self: &Arc<Self>,
        snapshot: &Snapshot,
        run: &RunContext,
        batch: &[ComponentId],
        tick: u64,
    ) -> Result<Vec<Invocation>, EngineError> {
        let component_timeout = self.config.component_timeout;
        let mut handles = Vec::with_capacity(batch.len());

        for id in batch {
            let (Some(instance), Some(component)) =
                (self.graph.component(id).cloned(), self.components.get(id).cloned())
            else {
                continue;
            };

            let input = self.prepare_input(snapshot, &instance);
            let runtime_data = snapshot
                .state(id)
                .map(|s| s.runtime_data.clone())
                .unwrap_or_default();
            let ctx = ProcessContext::new(
                instance,
                tick,
                runtime_data,
                AgentHandle::new(self.clone(), run.clone()),
            );
            let permits = Arc::clone(&self.permits);

            let handle = tokio::spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                invoke(component, input, ctx, component_timeout).await
            });
            handles.push((id.clone(), handle));
        }

        let joined = join_all(
            handles
                .into_iter()
                .map(|(id, handle)| async move { (id, handle.await) }),
        )
        .await;

        let mut invocations = Vec::with_capacity(joined.len());
        for (id, joined) in joined {
            let invocation = match joined {
                Ok(invocation) => invocation,
                Err(e) => {
                    tracing::error!(component_id = %id, error = %e, "Component task failed");
                    Invocation {
                        output: ComponentError::Panicked(e.to_string()).to_output(&id),
                        id,
                        failed: true,
                        effects: None,
                    }
                }
            };
            invocations.push(invocation);
        }
        Ok(invocations)
    }

    /// Record an invocation in the snapshot and collect its deliveries
    fn apply_invocation(
        &self,
        snapshot: &mut Snapshot,
        invocation: Invocation,
        tick: u64,
        deliveries: &mut Vec<Delivery>,
    ) {
        let Some(instance) = self.graph.component(&invocation.id).cloned() else {
            return;
        };
        let flags = self.flags(&invocation.id);

        let state = snapshot.state_mut(&invocation.id);
        let effects = invocation.effects.unwrap_or_else(|| InvocationEffects {
            runtime_data: state.runtime_data.clone(),
            ..Default::default()
        });

        state.step = tick;
        state.runtime_data = effects.runtime_data;
        state.active = flags.always_active || effects.keep_active;
        state.input.clear();
        state.status = if invocation.failed {
            ComponentStatus::Failed
        } else if effects.keep_active {
            ComponentStatus::InProgress
        } else {
            ComponentStatus::Done
        };
        state.output = (!invocation.output.is_null()).then(|| invocation.output.clone());
        let child_loop = state.runtime_data.child_loop.clone();

        snapshot.pending_jobs.extend(effects.spawned_jobs);

        if invocation.failed {
            snapshot.record_error(LeafResult {
                component_id: instance.id.clone(),
                kind: instance.kind.clone(),
                output: invocation.output.clone(),
                step: tick,
                is_leaf: instance.is_leaf(),
            });
        }

        if invocation.output.is_null() {
            return;
        }

        if instance.is_leaf() {
            if !invocation.failed {
                self.collect_leaf(snapshot, &instance, invocation.output, child_loop, tick);
            }
            return;
        }

        let scope = if effects.loop_body {
            Some(instance.id.clone())
        } else {
            child_loop.clone()
        };

        let before = deliveries.len();
        for connection in self.graph.outgoing(&instance.id) {
            let Some(port) = instance.outputs.get(connection.source_port) else {
                continue;
            };
            if port.is_error_port() != invocation.failed {
                continue;
            }
            if let Some(value) = resolve_output(&invocation.output, port) {
                let Some(target) = self.graph.component(&connection.target) else {
                    continue;
                };
                let Some(target_port) = target.inputs.get(connection.target_port) else {
                    continue;
                };
                deliveries.push(Delivery {
                    connection: connection.index,
                    target: connection.target.clone(),
                    port: target_port.name.clone(),
                    value,
                    scope: scope.clone(),
                });
            }
        }

        if deliveries.len() == before && effects.loop_finished && !invocation.failed {
            self.collect_leaf(snapshot, &instance, invocation.output, child_loop, tick);
        }
    }

    /// Record a leaf result, or append it to the loop whose body produced it
    fn collect_leaf(
        &self,
        snapshot: &mut Snapshot,
        instance: &ComponentInstance,
        output: Value,
        child_loop: Option<ComponentId>,
        tick: u64,
    ) {
        if let Some(loop_id) = child_loop.filter(|id| id != &instance.id) {
            if let Some(loop_state) = snapshot.state_mut(&loop_id).runtime_data.loop_state.as_mut() {
                loop_state.results.push(output);
                return;
            }
        }

        if snapshot.record_leaf(LeafResult::leaf(
            instance.id.clone(),
            instance.kind.clone(),
            output,
            tick,
        )) {
            tracing::debug!(component_id = %instance.id, step = tick, "Leaf result recorded");
        }
    }

    /// Merge deliveries into target inputs and queue the ready targets
    fn deliver(
        &self,
        snapshot: &mut Snapshot,
        mut deliveries: Vec<Delivery>,
        exclusive_tick: bool,
        next: &mut Vec<ComponentId>,
        report: &mut CycleReport,
    ) {
        deliveries.sort_by_key(|d| d.connection);

        let mut grouped: Vec<(ComponentId, String, Vec<Value>, Option<ComponentId>)> = Vec::new();
        for delivery in deliveries {
            match grouped
                .iter_mut()
                .find(|(target, port, _, _)| *target == delivery.target && *port == delivery.port)
            {
                Some((_, _, values, scope)) => {
                    values.push(delivery.value);
                    if delivery.scope.is_some() {
                        *scope = delivery.scope;
                    }
                }
                None => grouped.push((
                    delivery.target,
                    delivery.port,
                    vec![delivery.value],
                    delivery.scope,
                )),
            }
        }

        let mut targets: Vec<ComponentId> = Vec::new();
        for (target, port, values, scope) in grouped {
            let state = snapshot.state_mut(&target);
            state.input.insert(port, merge_port_values(values));
            state.active = true;
            state.runtime_data.child_loop = scope;
            if !targets.contains(&target) {
                targets.push(target);
            }
        }

        for target in targets {
            let Some(instance) = self.graph.component(&target) else {
                continue;
            };
            let missing = self.missing_inputs(snapshot, instance);
            let state = snapshot.state_mut(&target);
            if !missing.is_empty() {
                tracing::debug!(component_id = %target, ?missing, "Component waiting for inputs");
                state.status = ComponentStatus::Waiting;
                if !report.waiting.contains(&target) {
                    report.waiting.push(target);
                }
                continue;
            }

            state.status = ComponentStatus::InProgress;
            if exclusive_tick && !self.flags(&target).exclusive {
                continue;
            }
            if self.loop_blocked(snapshot, &target, next) {
                tracing::debug!(component_id = %target, "Loop waiting for its body");
                continue;
            }
            if !next.contains(&target) {
                next.push(target);
            }
        }
    }

    /// Mark the session closed; a root run releases its counters
    fn close(&self, snapshot: &mut Snapshot, run: &RunContext) {
        for state in snapshot.states.values_mut() {
            state.active = false;
        }
        snapshot.closed = true;
        if run.root {
            self.services.counters.release_root(&run.process_id);
        }
        tracing::info!(
            session_id = %snapshot.process_id,
            workflow_id = %snapshot.workflow_id,
            step = snapshot.step,
            leaves = snapshot.leaves.len(),
            errors = snapshot.errors.len(),
            "Session closed"
        );
    }

    async fn persist(&self, snapshot: &mut Snapshot, run: &RunContext) -> Result<(), EngineError> {
        snapshot.touch();
        let key = self.store_key(snapshot, run);
        self.services.store.save(&key, snapshot).await
    }

    async fn abort_killed(
        &self,
        snapshot: &mut Snapshot,
        run: &RunContext,
    ) -> Result<EngineError, EngineError> {
        snapshot.killed = true;
        self.close(snapshot, run);
        self.persist(snapshot, run).await?;
        tracing::info!(session_id = %snapshot.process_id, "Session killed");
        Ok(EngineError::killed(
            snapshot.process_id.clone(),
            snapshot.partial_results(),
        ))
    }

    async fn abort_circular(
        &self,
        snapshot: &mut Snapshot,
        run: &RunContext,
        tick: u64,
        id: &ComponentId,
        limit: u32,
        count: u32,
    ) -> Result<EngineError, EngineError> {
        tracing::warn!(
            session_id = %snapshot.process_id,
            component_id = %id,
            limit,
            "Circular limit exceeded"
        );
        snapshot.step = tick;
        snapshot.invocations = self.services.counters.snapshot(&run.process_id);
        snapshot.breach = Some(CircularBreach {
            component_id: id.clone(),
            limit,
            count,
        });
        self.close(snapshot, run);
        self.persist(snapshot, run).await?;
        Ok(EngineError::circular_limit(
            id.clone(),
            limit,
            snapshot.partial_results(),
        ))
    }

    // ========================================================================
    // Runs
    // ========================================================================

    /// Tick until the session closes, bounded by `run_timeout` and `max_ticks`
    pub async fn run_to_completion(
        self: &Arc<Self>,
        snapshot: &mut Snapshot,
        run: &RunContext,
    ) -> Result<RunOutput, EngineError> {
        let run_timeout = self.config.run_timeout;
        let result = timeout(run_timeout, self.drive(snapshot, run)).await;
        match result {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(session_id = %snapshot.process_id, ?run_timeout, "Run timed out");
                run.cancel.cancel();
                self.close(snapshot, run);
                self.persist(snapshot, run).await?;
                Err(EngineError::run_timeout(run_timeout, snapshot.partial_results()))
            }
        }
    }

    async fn drive(
        self: &Arc<Self>,
        snapshot: &mut Snapshot,
        run: &RunContext,
    ) -> Result<RunOutput, EngineError> {
        let max_ticks = self.config.max_ticks;
        let mut ticks = 0u64;

        loop {
            let report = self.run_cycle(snapshot, run).await?;
            if report.closed {
                return Ok(RunOutput::from_snapshot(snapshot));
            }

            if report.fired.is_empty() {
                tokio::select! {
                    _ = self.services.jobs.wait(self.config.join_poll_interval) => {}
                    _ = run.cancel.cancelled() => {}
                }
                continue;
            }

            ticks += 1;
            if ticks >= max_ticks {
                tracing::warn!(session_id = %snapshot.process_id, max_ticks, "Max ticks exceeded");
                self.close(snapshot, run);
                self.persist(snapshot, run).await?;
                return Err(EngineError::max_ticks(max_ticks, snapshot.partial_results()));
            }
        }
    }

    /// Run the sub-graph rooted at `target` on a detached task and return
    /// the id of the job tracking it
    pub async fn spawn_fork(
        self: &Arc<Self>,
        run: &RunContext,
        target: &ComponentId,
        input: Map<String, Value>,
    ) -> Result<String, EngineError> {
        let fork = derive_fork_graph(&self.graph, target)?;
        let child = Arc::new(self.derive(fork.graph)?);
        let job_id = self.services.jobs.create(&run.agent_id).await?;

        let child_run = run.forked();
        let mut snapshot = child.new_snapshot(&child_run);
        child.seed_entry(&mut snapshot, &fork.entry, Value::Object(input));

        tracing::info!(
            session_id = %run.process_id,
            workflow_id = %child_run.workflow_id,
            %target,
            %job_id,
            "Fork spawned"
        );

        let jobs = Arc::clone(&self.services.jobs);
        let agent_id = run.agent_id.clone();
        let job = job_id.clone();
        self.services.counters.retain_fork(&child_run.process_id);

        tokio::spawn(async move {
            let outcome = child.run_to_completion(&mut snapshot, &child_run).await;
            child.counters().release_fork(&child_run.process_id);

            let key = child.store_key(&snapshot, &child_run);
            if let Err(e) = child.store().delete(&key).await {
                tracing::warn!(workflow_id = %child_run.workflow_id, error = %e, "Failed to delete fork snapshot");
            }

            let result = match outcome {
                Ok(output) if output.is_error() => Err(output.output.to_string()),
                Ok(output) => Ok(output.output),
                Err(e) => {
                    tracing::warn!(job_id = %job, error = %e, "Forked run failed");
                    Err(e.to_string())
                }
            };

            match jobs.complete(&agent_id, &job, result).await {
                Ok(true) => tracing::info!(job_id = %job, "Job completed"),
                Ok(false) => tracing::warn!(job_id = %job, "Job was evicted before completion"),
                Err(e) => tracing::warn!(job_id = %job, error = %e, "Failed to complete job"),
            }
        });

        Ok(job_id)
    }
}

/// Validate, process and post-process one component
async fn invoke(
    component: Arc<dyn Component>,
    input: ComponentInput,
    mut ctx: ProcessContext,
    component_timeout: Duration,
) -> Invocation {
    let id = ctx.id().clone();

    let result = match component.validate_config(ctx.config()) {
        Err(e) => Err(e),
        Ok(()) => {
            let work = async {
                let output = component.process(input, &mut ctx).await?;
                component.post_process(output, &mut ctx).await
            };
            match timeout(component_timeout, work).await {
                Ok(result) => result,
                Err(_) => Err(ComponentError::Timeout(component_timeout)),
            }
        }
    };

    let (output, failed) = match result {
        Ok(output) => {
            let failed = error_of(&output).is_some();
            if failed {
                tracing::warn!(component_id = %id, "Component returned an error output");
            }
            (output, failed)
        }
        Err(e) => {
            tracing::warn!(component_id = %id, error = %e, "Component failed");
            (e.to_output(&id), true)
        }
    };

    Invocation {
        id,
        output,
        failed,
        effects: Some(ctx.into_effects()),
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("agent", &self.graph.id())
            .field("components", &self.graph.len())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ComponentDefinition;
    use serde_json::json;

    fn scheduler(graph: AgentGraph) -> Arc<Scheduler> {
        Arc::new(
            Scheduler::compile(
                Arc::new(graph),
                Arc::new(ComponentRegistry::new()),
                EngineConfig::default(),
                RuntimeServices::default(),
            )
            .unwrap(),
        )
    }

    fn entry(id: &str) -> ComponentDefinition {
        ComponentDefinition::new(id, "endpoint")
            .with_config(json!({"path": "/run"}))
            .output("x")
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let graph = AgentGraph::builder("a")
            .component(ComponentDefinition::new("x", "mystery"))
            .build()
            .unwrap();
        let err = Scheduler::compile(
            Arc::new(graph),
            Arc::new(ComponentRegistry::new()),
            EngineConfig::default(),
            RuntimeServices::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::UnknownComponentKind { .. }));
    }

    #[test]
    fn test_seed_entry_wraps_scalars() {
        let graph = AgentGraph::builder("a").component(entry("in")).build().unwrap();
        let scheduler = scheduler(graph);
        let run = RunContext::new("a", "p");
        let mut snapshot = scheduler.new_snapshot(&run);

        scheduler.seed_entry(&mut snapshot, &"in".into(), json!(3));
        let state = snapshot.state(&"in".into()).unwrap();
        assert!(state.active);
        assert_eq!(state.input["body"], json!(3));
    }

    #[test]
    fn test_missing_inputs_respect_defaults() {
        let graph = AgentGraph::builder("a")
            .component(entry("in"))
            .component(
                ComponentDefinition::new("p", "passthrough")
                    .input("a")
                    .input_with_default("b", json!(1))
                    .optional_input("c"),
            )
            .connect("in", "x", "p", "a")
            .build()
            .unwrap();
        let scheduler = scheduler(graph);
        let run = RunContext::new("a", "p");
        let mut snapshot = scheduler.new_snapshot(&run);
        let p = scheduler.graph().component(&"p".into()).unwrap().clone();

        assert_eq!(scheduler.missing_inputs(&snapshot, &p), vec!["a"]);
        snapshot.state_mut(&p.id).input.insert("a".into(), json!(0));
        assert!(scheduler.missing_inputs(&snapshot, &p).is_empty());

        let input = scheduler.prepare_input(&snapshot, &p);
        assert_eq!(input["b"], json!(1));
        assert!(!input.contains_key("c"));
    }

    #[tokio::test]
    async fn test_single_tick_closes_linear_graph() {
        let graph = AgentGraph::builder("a")
            .component(entry("in"))
            .component(ComponentDefinition::new("p", "passthrough").input("x"))
            .connect("in", "x", "p", "x")
            .build()
            .unwrap();
        let scheduler = scheduler(graph);
        let run = RunContext::new("a", "p1");
        let mut snapshot = scheduler.new_snapshot(&run);
        scheduler.seed_entry(&mut snapshot, &"in".into(), json!({"x": 5}));

        let report = scheduler.run_cycle(&mut snapshot, &run).await.unwrap();
        assert!(report.closed);
        assert_eq!(report.fired, vec![ComponentId::from("in"), ComponentId::from("p")]);
        assert_eq!(snapshot.step, 1);
        assert_eq!(snapshot.leaves[0].output, json!({"x": 5}));

        let stored = scheduler.store().load(&snapshot.key()).await.unwrap().unwrap();
        assert!(stored.closed);
    }

    #[tokio::test]
    async fn test_variable_read_without_firing() {
        let graph = AgentGraph::builder("a")
            .component(entry("in"))
            .component(
                ComponentDefinition::new("var", "variable")
                    .with_config(json!({"initial": 42}))
                    .optional_input("set")
                    .output("value"),
            )
            .component(
                ComponentDefinition::new("p", "passthrough")
                    .input("x")
                    .input("v"),
            )
            .connect("in", "x", "p", "x")
            .connect("var", "value", "p", "v")
            .build()
            .unwrap();
        let scheduler = scheduler(graph);
        let run = RunContext::new("a", "p2");
        let mut snapshot = scheduler.new_snapshot(&run);
        scheduler.seed_entry(&mut snapshot, &"in".into(), json!({"x": 1}));

        let output = scheduler.run_to_completion(&mut snapshot, &run).await.unwrap();
        assert_eq!(output.output, json!({"x": 1, "v": 42}));
    }
}
