//! Convoy Core - Data Model and Service Seams
//!
//! Entities, selections, the typed predicate tree, declarative attribute
//! merge, task handles and the async service traits. Everything the
//! orchestrator and the HTTP clients share lives here; this crate performs
//! no I/O of its own.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod config;
pub mod entity;
pub mod error;
pub mod filter;
pub mod merge;
pub mod services;
pub mod task;

pub use config::{ConvoyConfig, PollConfig, Service, ServiceEndpoints};
pub use entity::{Entity, NicRecord, SelectionCriterion, WorkingSet};
pub use error::{
    ConfigError, ConvoyError, ConvoyResult, ResolutionError, TaskError, TransportError,
    ValidationError,
};
pub use filter::{InventoryQuery, Predicate};
pub use merge::{merge, merge_batch, AttributeDelta, MergeBatch, MergeMode, SkipReason};
pub use services::{
    InventoryService, NicService, ResolveRequest, ResolveResponse, RuleService, TaskService,
};
pub use task::{
    FirewallData, OrchestrationResult, Rule, Stage, TaskHandle, TaskOperation, TaskPayload,
    TaskState, TaskStatus,
};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Inventory identifier of a managed entity.
pub type EntityId = String;

/// Identifier of a node (host) that runs tasks.
pub type NodeId = String;

/// Identifier of an entity owner.
pub type OwnerId = String;

/// Identifier assigned by the task service.
pub type TaskId = String;

/// Correlation id of one orchestration run (UUIDv7, time-sortable).
pub type RunId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 run id.
pub fn new_run_id() -> RunId {
    Uuid::now_v7()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_are_v7_and_sortable() {
        let a = new_run_id();
        let b = new_run_id();
        assert_eq!(a.get_version_num(), 7);
        assert!(a <= b);
    }
}
