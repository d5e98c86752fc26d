//! Task service client.

use crate::http::RestClient;
use async_trait::async_trait;
use convoy_core::{
    ConvoyConfig, ConvoyResult, Service, TaskId, TaskOperation, TaskPayload, TaskService,
    TaskState,
};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Response of a task submission.
#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: TaskId,
}

/// Response of `GET /tasks/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskRecord {
    pub status: String,
    #[serde(default)]
    pub history: Vec<TaskEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskEvent {
    #[serde(default)]
    pub event: Option<Value>,
}

impl From<TaskRecord> for TaskState {
    /// `complete` and `failure` are terminal; any other status is pending.
    /// A completed task carries the first history event as auxiliary state.
    fn from(record: TaskRecord) -> Self {
        match record.status.as_str() {
            "complete" => {
                TaskState::complete(record.history.into_iter().next().and_then(|h| h.event))
            }
            "failure" => TaskState::failed(),
            _ => TaskState::pending(),
        }
    }
}

/// `targets/{node}/{operation}`; the operation path may span several segments.
fn submit_segments<'a>(node_id: &'a str, operation: &'a TaskOperation) -> Vec<&'a str> {
    let mut segments = vec!["targets", node_id];
    segments.extend(operation.path().split('/').filter(|s| !s.is_empty()));
    segments
}

/// HTTP implementation of [`TaskService`].
#[derive(Debug, Clone)]
pub struct TaskClient {
    rest: RestClient,
}

impl TaskClient {
    pub fn new(base_url: &str, timeout: Duration) -> ConvoyResult<Self> {
        Ok(Self {
            rest: RestClient::new(Service::Task, base_url, timeout)?,
        })
    }

    pub fn from_config(config: &ConvoyConfig) -> ConvoyResult<Self> {
        Ok(Self {
            rest: RestClient::from_config(Service::Task, config)?,
        })
    }
}

#[async_trait]
impl TaskService for TaskClient {
    async fn submit(
        &self,
        node_id: &str,
        operation: &TaskOperation,
        payload: &TaskPayload,
    ) -> ConvoyResult<TaskId> {
        let segments = submit_segments(node_id, operation);
        let response: SubmitResponse = self.rest.post_json(&segments, payload).await?;
        debug!(node_id, task_id = %response.id, operation = operation.path(), "task submitted");
        Ok(response.id)
    }

    async fn task_status(&self, task_id: &str) -> ConvoyResult<TaskState> {
        let record: TaskRecord = self
            .rest
            .get_json::<_, [(&str, &str)]>(&["tasks", task_id], None)
            .await?;
        Ok(TaskState::from(record))
    }

    async fn refresh_node(&self, node_id: &str) -> ConvoyResult<()> {
        self.rest
            .post_unit::<Value>(&["targets", node_id, "refresh"], None)
            .await
    }

    async fn push_node_state(&self, node_id: &str, state: &Value) -> ConvoyResult<()> {
        self.rest
            .post_unit(&["targets", node_id, "state"], Some(state))
            .await
    }
}
