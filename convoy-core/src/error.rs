//! Error types for convoy operations

use crate::{EntityId, NodeId, TaskId};
use std::time::Duration;
use thiserror::Error;

/// Target resolution errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    /// One or more explicitly requested identifiers matched no entity.
    #[error("Unknown {}: {}", entity_noun(.ids.len()), .ids.join(", "))]
    UnknownEntities { ids: Vec<EntityId> },
}

fn entity_noun(count: usize) -> &'static str {
    if count == 1 {
        "entity"
    } else {
        "entities"
    }
}

/// Failures talking to the inventory, task, rule or NIC services.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request to {service} failed with status {status}: {message}")]
    RequestFailed {
        service: String,
        status: u16,
        message: String,
    },

    #[error("Invalid response from {service}: {reason}")]
    InvalidResponse { service: String, reason: String },

    #[error("{service} unreachable: {reason}")]
    Unreachable { service: String, reason: String },
}

/// Remote task errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("Task \"{task_id}\" failed on node \"{node_id}\"")]
    Failed { task_id: TaskId, node_id: NodeId },

    #[error("Task \"{task_id}\" on node \"{node_id}\" did not finish within {waited:?}")]
    PollTimedOut {
        task_id: TaskId,
        node_id: NodeId,
        waited: Duration,
    },

    #[error("Work for node \"{node_id}\" aborted: {reason}")]
    Aborted { node_id: NodeId, reason: String },
}

/// Validation errors for malformed input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Unknown merge mode: {mode}")]
    UnknownMergeMode { mode: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all convoy errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConvoyError {
    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for convoy operations.
pub type ConvoyResult<T> = Result<T, ConvoyError>;

// =============================================================================
// TESTS
// =============================================================================
