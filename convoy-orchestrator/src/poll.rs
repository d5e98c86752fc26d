//! Poll-to-completion engine.
//!
//! Every pending handle gets its own poll loop on the tokio runtime. Within a
//! loop status queries are strictly sequential, separated by the configured
//! interval. Loops report back through a single `JoinSet`, which is the only
//! place the `succeeded` and `failed` collections are appended to.

use convoy_core::{
    ConvoyError, ConvoyResult, OrchestrationResult, PollConfig, TaskError, TaskHandle,
    TaskService, TaskStatus,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{Id, JoinSet};
use tracing::{debug, info, warn};

/// Terminal outcome of one handle's poll loop.
#[derive(Debug)]
struct PollOutcome {
    handle: TaskHandle,
    /// Auxiliary state on success
    result: ConvoyResult<Option<Value>>,
}

#[derive(Clone)]
pub struct PollEngine {
    tasks: Arc<dyn TaskService>,
    config: PollConfig,
}

impl PollEngine {
    pub fn new(tasks: Arc<dyn TaskService>, config: PollConfig) -> Self {
        Self { tasks, config }
    }

    /// Poll every handle until it reaches a terminal state.
    ///
    /// Handles that are already terminal are recorded as they are. The
    /// result is failed as a whole when any handle failed; `error` holds the
    /// first failure observed.
    pub async fn poll_all(&self, handles: Vec<TaskHandle>) -> OrchestrationResult {
        if handles.is_empty() {
            return OrchestrationResult {
                summary: "No tasks to poll".to_string(),
                ..Default::default()
            };
        }

        let total = handles.len();
        let mut result = OrchestrationResult::default();
        let mut set = JoinSet::new();
        let mut spawned: HashMap<Id, TaskHandle> = HashMap::new();

        for handle in handles {
            match handle.status {
                TaskStatus::Complete => result.succeeded.push(handle),
                TaskStatus::Failed => {
                    let err = task_failed(&handle);
                    record_failure(&mut result, handle, err);
                }
                TaskStatus::Pending => {
                    let tasks = Arc::clone(&self.tasks);
                    let config = self.config.clone();
                    let abort = set.spawn(poll_until_terminal(tasks, handle.clone(), config));
                    spawned.insert(abort.id(), handle);
                }
            }
        }

        while let Some(joined) = set.join_next_with_id().await {
            match joined {
                Ok((_, outcome)) => record_outcome(&mut result, outcome),
                Err(join_err) => {
                    let Some(handle) = spawned.remove(&join_err.id()) else {
                        continue;
                    };
                    let err = ConvoyError::Task(TaskError::Aborted {
                        node_id: handle.node_id.clone(),
                        reason: join_err.to_string(),
                    });
                    record_failure(&mut result, handle.with_status(TaskStatus::Failed), err);
                }
            }
        }

        result.summary = summarize(&result, total);
        if result.is_success() {
            info!(tasks = total, "{}", result.summary);
        } else {
            warn!(tasks = total, failed = result.failed.len(), "{}", result.summary);
        }
        result
    }
}

fn task_failed(handle: &TaskHandle) -> ConvoyError {
    ConvoyError::Task(TaskError::Failed {
        task_id: handle.task_id.clone(),
        node_id: handle.node_id.clone(),
    })
}

fn record_failure(result: &mut OrchestrationResult, handle: TaskHandle, err: ConvoyError) {
    warn!(node_id = %handle.node_id, task_id = %handle.task_id, error = %err, "task failed");
    result.failed.push(handle);
    if result.error.is_none() {
        result.error = Some(err);
    }
}

fn record_outcome(result: &mut OrchestrationResult, outcome: PollOutcome) {
    let PollOutcome { handle, result: polled } = outcome;
    match polled {
        Ok(auxiliary) => {
            debug!(node_id = %handle.node_id, task_id = %handle.task_id, "task complete");
            if let Some(state) = auxiliary {
                result.observed_state.insert(handle.node_id.clone(), state);
            }
            result.succeeded.push(handle);
        }
        Err(err) => record_failure(result, handle, err),
    }
}

fn summarize(result: &OrchestrationResult, total: usize) -> String {
    if result.failed.is_empty() {
        return format!("All {} node tasks returned successfully", total);
    }
    let nodes: Vec<&str> = result.failed.iter().map(|h| h.node_id.as_str()).collect();
    format!(
        "{} of {} node tasks failed on nodes: {}",
        result.failed.len(),
        total,
        nodes.join(", ")
    )
}

async fn poll_until_terminal(
    tasks: Arc<dyn TaskService>,
    handle: TaskHandle,
    config: PollConfig,
) -> PollOutcome {
    let polled = match config.timeout {
        Some(limit) => {
            match tokio::time::timeout(limit, poll_loop(tasks.as_ref(), &handle, config.interval)).await {
                Ok(polled) => polled,
                Err(_) => Err(ConvoyError::Task(TaskError::PollTimedOut {
                    task_id: handle.task_id.clone(),
                    node_id: handle.node_id.clone(),
                    waited: limit,
                })),
            }
        }
        None => poll_loop(tasks.as_ref(), &handle, config.interval).await,
    };

    let status = if polled.is_ok() {
        TaskStatus::Complete
    } else {
        TaskStatus::Failed
    };
    PollOutcome {
        handle: handle.with_status(status),
        result: polled,
    }
}

/// Wait one interval, query, repeat until the task is terminal. A failing
/// status query ends the loop with that error.
async fn poll_loop(
    tasks: &dyn TaskService,
    handle: &TaskHandle,
    interval: Duration,
) -> ConvoyResult<Option<Value>> {
    loop {
        tokio::time::sleep(interval).await;
        let state = tasks.task_status(&handle.task_id).await?;
        debug!(
            node_id = %handle.node_id,
            task_id = %handle.task_id,
            status = ?state.status,
            "retrieved task status"
        );
        match state.status {
            TaskStatus::Pending => continue,
            TaskStatus::Complete => return Ok(state.auxiliary),
            TaskStatus::Failed => return Err(task_failed(handle)),
        }
    }
}
