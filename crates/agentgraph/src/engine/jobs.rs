//! Job registry for forked runs
//!
//! A fork registers a `pending` job, the detached run completes it as `done`
//! or `failed`, and a join reads and evicts it. Jobs are keyed by the root
//! agent id and the job id, so forks of forks share one namespace.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};

use super::error::EngineError;

/// Lifecycle of a forked job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Done,
    Failed,
    /// Reported by a join for jobs that did not finish in time
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

/// One job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub agent_id: String,
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn pending(agent_id: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            job_id: job_id.into(),
            status: JobStatus::Pending,
            output: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// The entry a join reports for this job
    pub fn to_result(&self) -> Value {
        match self.status {
            JobStatus::Done => json!({"status": self.status, "output": self.output}),
            JobStatus::Failed => json!({"status": self.status, "error": self.error}),
            JobStatus::Pending | JobStatus::Unknown => json!({"status": JobStatus::Unknown}),
        }
    }
}

/// Shared registry of forked jobs
#[async_trait]
pub trait JobRegistry: Send + Sync {
    /// Register a new pending job and return its id
    async fn create(&self, agent_id: &str) -> Result<String, EngineError>;

    async fn get(&self, agent_id: &str, job_id: &str) -> Result<Option<JobRecord>, EngineError>;

    /// Mark a job done (`Ok`) or failed (`Err`).
    ///
    /// Returns `false` when the record no longer exists, e.g. because a join
    /// timed out and evicted it.
    async fn complete(
        &self,
        agent_id: &str,
        job_id: &str,
        outcome: Result<Value, String>,
    ) -> Result<bool, EngineError>;

    /// Remove and return a job record
    async fn delete(&self, agent_id: &str, job_id: &str) -> Result<Option<JobRecord>, EngineError>;

    /// Wait until a job may have changed, at most `interval`
    async fn wait(&self, interval: Duration) {
        tokio::time::sleep(interval).await;
    }
}

/// In-process job registry that wakes waiters on completion
#[derive(Debug, Default)]
pub struct MemoryJobRegistry {
    jobs: RwLock<HashMap<(String, String), JobRecord>>,
    changed: Notify,
}

impl MemoryJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobRegistry for MemoryJobRegistry {
    async fn create(&self, agent_id: &str) -> Result<String, EngineError> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let mut jobs = self.jobs.write().await;
        jobs.insert(
            (agent_id.to_string(), job_id.clone()),
            JobRecord::pending(agent_id, job_id.clone()),
        );
        Ok(job_id)
    }

    async fn get(&self, agent_id: &str, job_id: &str) -> Result<Option<JobRecord>, EngineError> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .get(&(agent_id.to_string(), job_id.to_string()))
            .cloned())
    }

    async fn complete(
        &self,
        agent_id: &str,
        job_id: &str,
        outcome: Result<Value, String>,
    ) -> Result<bool, EngineError> {
        let updated = {
            let mut jobs = self.jobs.write().await;
            match jobs.get_mut(&(agent_id.to_string(), job_id.to_string())) {
                Some(record) => {
                    match outcome {
                        Ok(output) => {
                            record.status = JobStatus::Done;
                            record.output = Some(output);
                        }
                        Err(error) => {
                            record.status = JobStatus::Failed;
                            record.error = Some(error);
                        }
                    }
                    record.completed_at = Some(Utc::now());
                    true
                }
                None => false,
            }
        };
        self.changed.notify_waiters();
        Ok(updated)
    }

    async fn delete(&self, agent_id: &str, job_id: &str) -> Result<Option<JobRecord>, EngineError> {
        let mut jobs = self.jobs.write().await;
        Ok(jobs.remove(&(agent_id.to_string(), job_id.to_string())))
    }

    async fn wait(&self, interval: Duration) {
        let _ = tokio::time::timeout(interval, self.changed.notified()).await;
    }
}
