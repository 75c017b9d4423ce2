use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tokio::time::Instant;

use crate::component::{Component, ComponentError, ComponentInput, ProcessContext};
use crate::engine::jobs::JobStatus;

/// Join (`await`): waits for forked jobs and reports their results.
///
/// Config: `jobs_count` (how many jobs must finish, default all) and
/// `max_time` in seconds (default from the engine config). Every collected
/// job is evicted from the registry; jobs still running when the budget runs
/// out are reported with status `unknown`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Join;

/// Job ids found on the input ports: strings, arrays of ids, or objects
/// carrying a `job_id`
pub fn collect_job_ids(input: &ComponentInput) -> Vec<String> {
    fn visit(value: &Value, ids: &mut Vec<String>) {
        match value {
            Value::String(id) => {
                if !ids.contains(id) {
                    ids.push(id.clone());
                }
            }
            Value::Array(items) => items.iter().for_each(|item| visit(item, ids)),
            Value::Object(map) => {
                if let Some(id) = map.get("job_id") {
                    visit(id, ids);
                }
            }
            _ => {}
        }
    }

    let mut ids = Vec::new();
    for value in input.values() {
        visit(value, &mut ids);
    }
    ids
}

#[async_trait]
impl Component for Join {
    fn validate_config(&self, config: &Value) -> Result<(), ComponentError> {
        if let Some(count) = config.get("jobs_count") {
            if count.as_u64().is_none() {
                return Err(ComponentError::invalid_config("'jobs_count' must be a non-negative integer"));
            }
        }
        if let Some(max_time) = config.get("max_time") {
            let valid = max_time
                .as_f64()
                .map(|secs| Duration::try_from_secs_f64(secs).is_ok())
                .unwrap_or(false);
            if !valid {
                return Err(ComponentError::invalid_config(
                    "'max_time' must be a finite, non-negative number of seconds",
                ));
            }
        }
        Ok(())
    }

    async fn process(
        &self,
        input: ComponentInput,
        ctx: &mut ProcessContext,
    ) -> Result<Value, ComponentError> {
        let job_ids = collect_job_ids(&input);
        let handle = ctx.handle().clone();
        let jobs = handle.jobs().clone();
        let agent_id = handle.agent_id().to_string();

        let wanted = ctx
            .config()
            .get("jobs_count")
            .and_then(Value::as_u64)
            .map(|n| (n as usize).min(job_ids.len()))
            .unwrap_or(job_ids.len());
        let budget = ctx
            .config()
            .get("max_time")
            .and_then(Value::as_f64)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or(handle.config().default_join_wait)
            .min(handle.config().component_timeout);
        let poll = handle.config().join_poll_interval;
        let deadline = Instant::now() + budget;

        loop {
            let mut finished = 0;
            for job_id in &job_ids {
                let record = jobs
                    .get(&agent_id, job_id)
                    .await
                    .map_err(|e| ComponentError::runtime(e.to_string()))?;
                if record.map(|r| r.status.is_terminal()).unwrap_or(false) {
                    finished += 1;
                }
            }
            if finished >= wanted {
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    component_id = %ctx.id(),
                    finished,
                    wanted,
                    "Join wait budget exhausted"
                );
                break;
            }

            tokio::select! {
                _ = jobs.wait(poll.min(deadline - now)) => {}
                _ = handle.run().cancel.cancelled() => break,
            }
        }

        let mut results = Map::new();
        let mut completed = 0;
        for job_id in &job_ids {
            let record = jobs
                .delete(&agent_id, job_id)
                .await
                .map_err(|e| ComponentError::runtime(e.to_string()))?;
            let result = match record {
                Some(record) => {
                    if record.status.is_terminal() {
                        completed += 1;
                    }
                    record.to_result()
                }
                None => json!({ "status": JobStatus::Unknown }),
            };
            results.insert(job_id.clone(), result);
        }

        Ok(json!({ "results": results, "completed": completed }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_job_ids_from_mixed_inputs() {
        let mut input = ComponentInput::new();
        input.insert("a".into(), json!("j1"));
        input.insert("b".into(), json!([{"job_id": "j2"}, "j3", "j1"]));
        input.insert("c".into(), json!({"job_id": "j4"}));
        input.insert("d".into(), json!(7));

        assert_eq!(collect_job_ids(&input), vec!["j1", "j2", "j3", "j4"]);
    }

    #[test]
    fn test_join_config_validation() {
        assert!(Join.validate_config(&json!({})).is_ok());
        assert!(Join.validate_config(&json!({"jobs_count": 2, "max_time": 0.5})).is_ok());
        assert!(Join.validate_config(&json!({"jobs_count": -1})).is_err());
        assert!(Join.validate_config(&json!({"max_time": "soon"})).is_err());
    }

    #[test]
    fn test_join_rejects_unrepresentable_max_time() {
        assert!(Join.validate_config(&json!({"max_time": -0.5})).is_err());
        assert!(Join.validate_config(&json!({"max_time": 1e300})).is_err());
        assert!(Join.validate_config(&json!({"max_time": f64::MAX})).is_err());
    }
}
