//! Convoy Orchestrator - Fan-Out, Poll, Aggregate
//!
//! Coordinates one change across a dynamic set of remote nodes:
//! - Target resolution against the inventory
//! - Rule resolution for entities being created or updated
//! - Concurrent task dispatch, one task per node
//! - Poll-to-completion with a single aggregation point
//! - NIC tag workflow and follow-up node state refresh
//!
//! The [`Orchestrator`] chains these stages into the end-to-end pipelines.

pub mod dispatch;
pub mod nic;
pub mod pipeline;
pub mod policy;
pub mod poll;
pub mod refresh;
pub mod resolver;
pub mod telemetry;

pub use dispatch::{exclude_node, firewall_payload, TaskDispatcher};
pub use nic::{
    apply_nic_updates, delete_nics, nic_payload, node_nics, parse_nic_action, update_nics,
    validate_nic_params,
};
pub use pipeline::{
    EntityChangeRequest, FirewallUpdateRequest, NicUpdateRequest, Orchestrator, RunReport,
};
pub use policy::{
    build_payload, AttributeContext, ChangeKind, PolicyPayload, PolicyResolution, ResolvedPolicy,
    RuleResolver,
};
pub use poll::PollEngine;
pub use refresh::refresh_node_state;
pub use resolver::{build_query, criterion_predicate, TargetResolver};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
