//! Task dispatch: fan one operation out to every targeted node.

use convoy_core::{
    ConvoyError, ConvoyResult, Entity, NodeId, Rule, RunId, Stage, TaskError, TaskHandle,
    TaskOperation, TaskPayload, TaskService,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::task::{Id, JoinSet};
use tracing::{debug, info};

#[derive(Clone)]
pub struct TaskDispatcher {
    tasks: Arc<dyn TaskService>,
}

impl TaskDispatcher {
    pub fn new(tasks: Arc<dyn TaskService>) -> Self {
        Self { tasks }
    }

    /// Submit `operation` to every node in `nodes`, building each node's
    /// payload with `payload_for`.
    ///
    /// Submissions run concurrently. The first failure aborts the remaining
    /// submissions and is returned; handles already obtained are dropped.
    /// On success the handles come back in node order, all pending.
    pub async fn dispatch<F>(
        &self,
        nodes: &BTreeSet<NodeId>,
        operation: &TaskOperation,
        payload_for: F,
    ) -> ConvoyResult<Stage<Vec<TaskHandle>>>
    where
        F: Fn(&str) -> TaskPayload,
    {
        if nodes.is_empty() {
            return Ok(Stage::noop(Vec::new(), "No remote nodes to update"));
        }

        let mut set = JoinSet::new();
        let mut spawned: HashMap<Id, NodeId> = HashMap::new();
        for node_id in nodes {
            let payload = payload_for(node_id);
            debug!(node_id = %node_id, operation = operation.path(), ?payload, "submitting task");
            let tasks = Arc::clone(&self.tasks);
            let operation = operation.clone();
            let node_id = node_id.clone();
            let abort = set.spawn({
                let node_id = node_id.clone();
                async move {
                    let task_id = tasks.submit(&node_id, &operation, &payload).await?;
                    Ok::<_, ConvoyError>(TaskHandle::pending(node_id, task_id))
                }
            });
            spawned.insert(abort.id(), node_id);
        }

        let mut handles: BTreeMap<NodeId, TaskHandle> = BTreeMap::new();
        while let Some(joined) = set.join_next_with_id().await {
            let handle = match joined {
                Ok((_, Ok(handle))) => handle,
                Ok((_, Err(err))) => {
                    set.abort_all();
                    return Err(err);
                }
                Err(join_err) => {
                    set.abort_all();
                    let node_id = spawned.remove(&join_err.id()).unwrap_or_default();
                    return Err(ConvoyError::Task(TaskError::Aborted {
                        node_id,
                        reason: join_err.to_string(),
                    }));
                }
            };
            debug!(node_id = %handle.node_id, task_id = %handle.task_id, "task started");
            handles.insert(handle.node_id.clone(), handle);
        }

        let node_list: Vec<&str> = nodes.iter().map(String::as_str).collect();
        let summary = format!("Started update on nodes: {}", node_list.join(", "));
        info!(operation = operation.path(), "{}", summary);
        Ok(Stage::done(handles.into_values().collect(), summary))
    }
}

/// Remove `node_id` from a dispatch set.
pub fn exclude_node(nodes: &BTreeSet<NodeId>, node_id: Option<&str>) -> Stage<BTreeSet<NodeId>> {
    if nodes.is_empty() {
        return Stage::noop(BTreeSet::new(), "No nodes: not filtering");
    }
    let Some(node_id) = node_id else {
        return Stage::noop(nodes.clone(), "No node given: not filtering");
    };
    let remaining = nodes.iter().filter(|n| n.as_str() != node_id).cloned().collect();
    Stage::done(remaining, format!("Removed node {} from dispatch list", node_id))
}

/// Standard firewall payload for `node_id`: the rule, if any, and every
/// matched entity hosted elsewhere.
pub fn firewall_payload(
    run_id: RunId,
    rules: Option<&[Rule]>,
    matched: &[Entity],
    node_id: &str,
) -> TaskPayload {
    let mut payload = TaskPayload::new(run_id);
    if let Some(rules) = rules {
        payload = payload.with_rules(rules.to_vec());
    }
    let remote: Vec<Entity> = matched.iter().filter(|e| e.node_id != node_id).cloned().collect();
    if !remote.is_empty() {
        payload = payload.with_remote_entities(remote);
    }
    payload
}
