//! Convoy Clients - HTTP Service Adapters
//!
//! reqwest-backed implementations of the service traits in `convoy-core`:
//! the entity inventory, the per-node task API, the rule resolution service
//! and the NIC inventory. Wire records are decoded here and converted into
//! core types before they reach orchestration code.

mod http;
pub mod inventory;
pub mod nics;
pub mod rules;
pub mod tasks;

pub use http::RestClient;
pub use inventory::{InventoryClient, InventoryRecord};
pub use nics::NicClient;
pub use rules::RuleClient;
pub use tasks::{TaskClient, TaskRecord};
