//! Integration Tests for fork (`async`) and join (`await`)
//!
//! These tests verify:
//! - A forked sub-graph runs detached and its result reaches the join
//! - Several forks joined at once, with `jobs_count`
//! - Join budget exhaustion reports `unknown` and evicts the job
//! - Failed forked runs are reported as `failed`
//! - Fork and join inside a loop body, one job per element
//! - A fork outliving its killed session releases the call counters

mod common;

use std::sync::Arc;
use std::time::Duration;

use agentgraph::{
    Agent, AgentGraph, AgentRequest, CallCounters, ComponentDefinition, EngineConfig,
    EngineError, JobRegistry, MemoryJobRegistry, RunOutput,
};
use common::{endpoint, registry};
use serde_json::{json, Value};

fn fork(id: &str, target: &str) -> ComponentDefinition {
    ComponentDefinition::new(id, "async")
        .with_config(json!({ "target": target }))
        .input("n")
        .output("job_id")
}

fn join(config: Value) -> ComponentDefinition {
    ComponentDefinition::new("join", "await")
        .with_config(config)
        .optional_input("a")
        .optional_input("b")
        .output("results")
        .output("completed")
}

async fn run_with_jobs(graph: AgentGraph, input: Value) -> (RunOutput, Arc<MemoryJobRegistry>) {
    let jobs = Arc::new(MemoryJobRegistry::new());
    let agent = Agent::builder(graph)
        .with_registry(registry())
        .with_jobs(jobs.clone())
        .build()
        .expect("Failed to build agent");
    let output = agent
        .process("/run", input)
        .await
        .expect("Run failed")
        .into_output()
        .expect("Session should be closed");
    (output, jobs)
}

fn single_result(joined: &Value) -> Value {
    let results = joined["results"]
        .as_object()
        .expect("results object");
    assert_eq!(results.len(), 1);
    results.values().next().cloned().unwrap_or(Value::Null)
}

#[tokio::test]
async fn test_fork_join_round_trip() {
    let graph = AgentGraph::builder("fork")
        .component(endpoint("ep", "/run", &["n"]))
        .component(fork("f", "worker"))
        .component(ComponentDefinition::new("worker", "double").input("n"))
        .component(join(json!({"max_time": 5})))
        .component(ComponentDefinition::new("sink", "passthrough").input("results"))
        .connect("ep", "n", "f", "n")
        .connect("f", "job_id", "join", "a")
        .connect("join", "results", "sink", "results")
        .build()
        .expect("Failed to build graph");

    let (output, jobs) = run_with_jobs(graph, json!({"n": 21})).await;

    let result = single_result(&output.output);
    assert_eq!(result["status"], "done");
    assert_eq!(result["output"], json!(42));
    assert!(jobs.is_empty().await);
}

#[tokio::test]
async fn test_fork_runs_downstream_of_target() {
    let graph = AgentGraph::builder("fork-chain")
        .component(endpoint("ep", "/run", &["n"]))
        .component(fork("f", "first"))
        .component(
            ComponentDefinition::new("first", "double")
                .input("n")
                .output("n"),
        )
        .component(ComponentDefinition::new("second", "double").input("n"))
        .component(join(json!({})))
        .connect("ep", "n", "f", "n")
        .connect("f", "job_id", "join", "a")
        .connect("first", "n", "second", "n")
        .build()
        .expect("Failed to build graph");

    let (output, _) = run_with_jobs(graph, json!({"n": 3})).await;
    let result = single_result(&output.output);
    assert_eq!(result["output"], json!(12));
    assert_eq!(output.output["completed"], json!(1));
}

#[tokio::test]
async fn test_join_waits_for_several_jobs() {
    let graph = AgentGraph::builder("fork-many")
        .component(endpoint("ep", "/run", &["n"]))
        .component(fork("f1", "w1"))
        .component(fork("f2", "w2"))
        .component(ComponentDefinition::new("w1", "double").input("n"))
        .component(
            ComponentDefinition::new("w2", "sleep")
                .with_config(json!({"ms": 50}))
                .input("n"),
        )
        .component(join(json!({"jobs_count": 2, "max_time": 5})))
        .connect("ep", "n", "f1", "n")
        .connect("ep", "n", "f2", "n")
        .connect("f1", "job_id", "join", "a")
        .connect("f2", "job_id", "join", "b")
        .build()
        .expect("Failed to build graph");

    let (output, jobs) = run_with_jobs(graph, json!({"n": 2})).await;

    let results = output.output["results"].as_object().expect("results object");
    assert_eq!(results.len(), 2);
    let outputs: Vec<&Value> = results.values().map(|r| &r["output"]).collect();
    assert!(outputs.contains(&&json!(4)));
    assert!(outputs.contains(&&json!({"n": 2})));
    assert!(jobs.is_empty().await);
}

#[tokio::test]
async fn test_join_timeout_reports_unknown() {
    let graph = AgentGraph::builder("fork-slow")
        .component(endpoint("ep", "/run", &["n"]))
        .component(fork("f", "slow"))
        .component(
            ComponentDefinition::new("slow", "sleep")
                .with_config(json!({"ms": 5000}))
                .input("n"),
        )
        .component(join(json!({"max_time": 0.1})))
        .connect("ep", "n", "f", "n")
        .connect("f", "job_id", "join", "a")
        .build()
        .expect("Failed to build graph");

    let (output, jobs) = run_with_jobs(graph, json!({"n": 1})).await;

    let result = single_result(&output.output);
    assert_eq!(result, json!({"status": "unknown"}));
    assert_eq!(output.output["completed"], json!(0));
    assert!(jobs.is_empty().await);
}

#[tokio::test]
async fn test_failed_fork_is_reported() {
    let graph = AgentGraph::builder("fork-fail")
        .component(endpoint("ep", "/run", &["n"]))
        .component(fork("f", "bad"))
        .component(ComponentDefinition::new("bad", "failing").input("n"))
        .component(join(json!({"max_time": 5})))
        .connect("ep", "n", "f", "n")
        .connect("f", "job_id", "join", "a")
        .build()
        .expect("Failed to build graph");

    let (output, _) = run_with_jobs(graph, json!({"n": 1})).await;

    let result = single_result(&output.output);
    assert_eq!(result["status"], "failed");
    assert!(result["error"].as_str().unwrap_or_default().contains("boom"));
}

#[tokio::test]
async fn test_unjoined_fork_keeps_session_open_until_done() {
    let graph = AgentGraph::builder("fork-detached")
        .component(endpoint("ep", "/run", &["n"]))
        .component(fork("f", "slow"))
        .component(
            ComponentDefinition::new("slow", "sleep")
                .with_config(json!({"ms": 100}))
                .input("n"),
        )
        .connect("ep", "n", "f", "n")
        .build()
        .expect("Failed to build graph");

    let jobs = Arc::new(MemoryJobRegistry::new());
    let agent = Agent::builder(graph)
        .with_registry(registry())
        .with_jobs(jobs.clone())
        .with_config(EngineConfig::default())
        .build()
        .expect("Failed to build agent");

    let output = agent
        .process("/run", json!({"n": 1}))
        .await
        .expect("Run failed")
        .into_output()
        .expect("Session should be closed");

    assert!(output.output["job_id"].is_string());
    let job_id = output.output["job_id"].as_str().unwrap_or_default();
    let record = jobs
        .get(agent.id(), job_id)
        .await
        .unwrap()
        .expect("job record is kept until joined");
    assert!(record.status.is_terminal());
}

// =============================================================================
// Forks inside loops
// =============================================================================

#[tokio::test]
async fn test_fork_join_inside_loop_body() {
    let graph = AgentGraph::builder("fork-loop")
        .component(endpoint("ep", "/run", &["items"]))
        .component(
            ComponentDefinition::new("loop", "for_each")
                .input("items")
                .output("item"),
        )
        .component(fork("f", "worker"))
        .component(ComponentDefinition::new("worker", "double").input("n"))
        .component(join(json!({"max_time": 5})))
        .connect("ep", "items", "loop", "items")
        .connect("loop", "item", "f", "n")
        .connect("f", "job_id", "join", "a")
        .build()
        .expect("Failed to build graph");

    let (output, jobs) = run_with_jobs(graph, json!({"items": [1, 2]})).await;

    // One joined job per element, in element order
    let done = output.output["done"].as_array().expect("done list");
    assert_eq!(done.len(), 2);
    let outputs: Vec<Value> = done
        .iter()
        .map(|joined| {
            assert_eq!(joined["completed"], json!(1));
            single_result(joined)["output"].clone()
        })
        .collect();
    assert_eq!(outputs, vec![json!(2), json!(4)]);
    assert!(jobs.is_empty().await);
}

// =============================================================================
// Orphaned forks
// =============================================================================

#[tokio::test]
async fn test_orphaned_fork_releases_counters() {
    let graph = AgentGraph::builder("fork-orphan")
        .component(endpoint("ep", "/run", &["n"]))
        .component(fork("f", "slow"))
        .component(
            ComponentDefinition::new("slow", "sleep")
                .with_config(json!({"ms": 500}))
                .input("n"),
        )
        .connect("ep", "n", "f", "n")
        .build()
        .expect("Failed to build graph");

    let counters = Arc::new(CallCounters::new());
    let agent = Arc::new(
        Agent::builder(graph)
            .with_registry(registry())
            .with_counters(counters.clone())
            .build()
            .expect("Failed to build agent"),
    );

    let running = {
        let agent = agent.clone();
        tokio::spawn(async move {
            agent
                .process_request(AgentRequest::new("/run", json!({"n": 1})).with_session("orphan"))
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(agent.kill("orphan").await.expect("Failed to kill"));
    let result = running.await.expect("Run task panicked");
    assert!(matches!(result, Err(EngineError::Killed { .. })));

    // The fork still runs under the session's tag
    assert!(counters.contains("orphan"));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while counters.contains("orphan") && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!counters.contains("orphan"));
}
