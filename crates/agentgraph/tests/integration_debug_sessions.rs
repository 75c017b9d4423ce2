//! Integration Tests for debug sessions
//!
//! These tests verify:
//! - Stepping a session across agent instances through a file store
//! - Step deltas report the states a tick changed
//! - Killing a session between steps and while it runs

mod common;

use std::sync::Arc;
use std::time::Duration;

use agentgraph::engine::FileSnapshotStore;
use agentgraph::{
    Agent, AgentGraph, AgentOutcome, AgentRequest, ComponentDefinition, ComponentId,
    EngineConfig, EngineError, SnapshotStore,
};
use common::{endpoint, registry};
use serde_json::json;
use tempfile::TempDir;

fn id(s: &str) -> ComponentId {
    ComponentId::from(s)
}

fn loop_graph(body_kind: &str, body_config: serde_json::Value) -> AgentGraph {
    AgentGraph::builder("debug-loop")
        .component(endpoint("ep", "/run", &["items"]))
        .component(
            ComponentDefinition::new("loop", "for_each")
                .with_config(json!({"minimize": true}))
                .input("items")
                .output("item"),
        )
        .component(
            ComponentDefinition::new("body", body_kind)
                .with_config(body_config)
                .input("n"),
        )
        .connect("ep", "items", "loop", "items")
        .connect("loop", "item", "body", "n")
        .build()
        .expect("Failed to build graph")
}

fn file_agent(dir: &TempDir) -> Agent {
    let store: Arc<dyn SnapshotStore> = Arc::new(FileSnapshotStore::new(dir.path(), false));
    Agent::builder(loop_graph("double", json!({})))
        .with_registry(registry())
        .with_store(store)
        .with_config(
            EngineConfig::default()
                .with_debug(true)
                .with_retain_closed_sessions(true),
        )
        .build()
        .expect("Failed to build agent")
}

fn expect_step(outcome: AgentOutcome) -> agentgraph::StepDelta {
    match outcome {
        AgentOutcome::Step(delta) => delta,
        AgentOutcome::Completed(output) => panic!("expected a step, got {output:?}"),
    }
}

// =============================================================================
// Resume across instances
// =============================================================================

#[tokio::test]
async fn test_session_resumes_in_another_agent() {
    let dir = TempDir::new().expect("Failed to create temp dir");

    let first_agent = file_agent(&dir);
    let first = expect_step(
        first_agent
            .process_request(
                AgentRequest::new("/run", json!({"items": [1, 2, 3]})).with_session("resume"),
            )
            .await
            .expect("Failed to open session"),
    );
    assert_eq!(first.session_id, "resume");
    assert!(!first.session_closed);

    let stored = first_agent
        .session("resume")
        .await
        .expect("Failed to load session")
        .expect("session is stored");
    assert_eq!(stored.step, 1);
    assert!(stored.invocations.get(&id("loop")).copied().unwrap_or(0) >= 1);
    drop(first_agent);

    // A fresh instance picks the session up from disk
    let second_agent = file_agent(&dir);
    assert_eq!(
        second_agent.sessions().await.expect("Failed to list sessions"),
        vec!["resume".to_string()]
    );

    let mut last = second_agent.step("resume").await.expect("Failed to step");
    while !last.session_closed {
        last = second_agent.step("resume").await.expect("Failed to step");
    }

    let result = last.result.expect("closed session has a result");
    assert_eq!(result.output, json!({"done": [2, 4, 6]}));
    assert_eq!(result.steps, 3);
}

#[tokio::test]
async fn test_stepping_a_closed_session_repeats_its_result() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let agent = file_agent(&dir);

    let mut delta = expect_step(
        agent
            .process_request(AgentRequest::new("/run", json!({"items": [5]})).with_session("s"))
            .await
            .expect("Failed to open session"),
    );
    while !delta.session_closed {
        delta = agent.step("s").await.expect("Failed to step");
    }

    let again = agent.step("s").await.expect("Failed to step closed session");
    assert!(again.session_closed);
    assert!(again.fired.is_empty());
    assert_eq!(again.result, delta.result);
}

// =============================================================================
// Step deltas
// =============================================================================

#[tokio::test]
async fn test_step_delta_reports_changed_states() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let agent = file_agent(&dir);

    let first = expect_step(
        agent
            .process("/run", json!({"items": [1, 2]}))
            .await
            .expect("Failed to open session"),
    );

    assert!(first.fired.contains(&id("ep")));
    assert!(first.fired.contains(&id("loop")));
    assert!(first.changed.contains_key(&id("ep")));
    assert!(first.changed.contains_key(&id("body")));

    let loop_state = first.changed[&id("loop")]
        .runtime_data
        .loop_state
        .clone()
        .expect("loop is running");
    assert_eq!(loop_state.length, 2);

    // The endpoint does not fire again, so it does not change
    let second = agent.step(&first.session_id).await.expect("Failed to step");
    assert!(!second.changed.contains_key(&id("ep")));
    assert!(second.changed.contains_key(&id("loop")));
}

// =============================================================================
// Kill
// =============================================================================

#[tokio::test]
async fn test_kill_between_steps() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let agent = file_agent(&dir);

    let first = expect_step(
        agent
            .process("/run", json!({"items": [1, 2, 3]}))
            .await
            .expect("Failed to open session"),
    );

    assert!(agent.kill(&first.session_id).await.expect("Failed to kill"));

    let err = agent.step(&first.session_id).await.unwrap_err();
    assert!(matches!(err, EngineError::Killed { .. }));

    // Killed sessions stay killed
    let err = agent.step(&first.session_id).await.unwrap_err();
    assert!(matches!(err, EngineError::Killed { .. }));
    assert!(!agent.kill(&first.session_id).await.expect("Failed to kill"));
}

#[tokio::test]
async fn test_kill_running_session() {
    let agent = Arc::new(
        Agent::builder(loop_graph("sleep", json!({"ms": 50})))
            .with_registry(registry())
            .build()
            .expect("Failed to build agent"),
    );

    let running = {
        let agent = agent.clone();
        tokio::spawn(async move {
            agent
                .process_request(
                    AgentRequest::new("/run", json!({"items": [1, 2, 3, 4, 5, 6, 7, 8]}))
                        .with_session("long"),
                )
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(agent.kill("long").await.expect("Failed to kill"));

    let result = running.await.expect("Run task panicked");
    assert!(matches!(result, Err(EngineError::Killed { .. })));

    let stored = agent
        .session("long")
        .await
        .expect("Failed to load session")
        .expect("killed session is kept");
    assert!(stored.killed);
}

#[tokio::test]
async fn test_kill_unknown_session() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let agent = file_agent(&dir);
    assert!(!agent.kill("nobody").await.expect("Failed to kill"));
}
