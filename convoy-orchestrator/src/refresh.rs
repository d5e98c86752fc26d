//! Follow-up node state refresh.

use convoy_core::{ConvoyResult, Stage, TaskService};
use serde_json::Value;
use tracing::{error, info};

/// Bring the task service's view of `node_id` up to date.
///
/// When a completed task already reported the node's state it is pushed
/// as-is; otherwise the node is asked to re-report.
pub async fn refresh_node_state(
    tasks: &dyn TaskService,
    node_id: &str,
    observed: Option<&Value>,
) -> ConvoyResult<Stage<()>> {
    let outcome = match observed {
        Some(state) => tasks.push_node_state(node_id, state).await,
        None => tasks.refresh_node(node_id).await,
    };
    if let Err(err) = outcome {
        error!(node_id, error = %err, "error refreshing node state");
        return Err(err);
    }

    let summary = match observed {
        Some(_) => format!("Pushed observed state for node {}", node_id),
        None => format!("Requested state refresh for node {}", node_id),
    };
    info!(node_id, "{}", summary);
    Ok(Stage::done((), summary))
}
