//! Convoy Test Utilities
//!
//! Centralized test infrastructure for the convoy workspace:
//! - In-memory mock services with call recording
//! - Proptest generators for core types
//! - Test fixtures for common scenarios
//! - Custom assertions for convoy-specific errors

pub use convoy_core::{
    AttributeDelta, ConvoyConfig, ConvoyError, ConvoyResult, Entity, EntityId, InventoryQuery,
    InventoryService, MergeMode, NicRecord, NicService, NodeId, OrchestrationResult, PollConfig,
    Predicate, ResolutionError, ResolveRequest, ResolveResponse, RuleService, SelectionCriterion,
    ServiceEndpoints, TaskError, TaskHandle, TaskId, TaskOperation, TaskPayload, TaskService,
    TaskState, TaskStatus, TransportError, ValidationError,
};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;

/// A transport failure attributed to `service`.
pub fn transport_error(service: &str, reason: &str) -> ConvoyError {
    ConvoyError::Transport(TransportError::Unreachable {
        service: service.to_string(),
        reason: reason.to_string(),
    })
}

// ============================================================================
// MOCK INVENTORY
// ============================================================================

/// Inventory that evaluates query predicates in memory.
#[derive(Debug, Clone, Default)]
pub struct MockInventory {
    entities: Arc<RwLock<Vec<Entity>>>,
    queries: Arc<RwLock<Vec<InventoryQuery>>>,
    failure: Arc<RwLock<Option<ConvoyError>>>,
    unfiltered: bool,
}

impl MockInventory {
    pub fn new(entities: Vec<Entity>) -> Self {
        Self {
            entities: Arc::new(RwLock::new(entities)),
            ..Self::default()
        }
    }

    /// Every subsequent query fails with `err`.
    pub fn failing_with(self, err: ConvoyError) -> Self {
        *self.failure.write().unwrap() = Some(err);
        self
    }

    /// Return every entity regardless of the query, like an inventory whose
    /// filter matches too loosely.
    pub fn ignoring_filter(mut self) -> Self {
        self.unfiltered = true;
        self
    }

    /// Queries received so far, in order.
    pub fn queries(&self) -> Vec<InventoryQuery> {
        self.queries.read().unwrap().clone()
    }

    pub fn query_count(&self) -> usize {
        self.queries.read().unwrap().len()
    }
}

#[async_trait]
impl InventoryService for MockInventory {
    async fn list_entities(&self, query: &InventoryQuery) -> ConvoyResult<Vec<Entity>> {
        self.queries.write().unwrap().push(query.clone());
        if let Some(err) = self.failure.read().unwrap().clone() {
            return Err(err);
        }
        let entities = self.entities.read().unwrap();
        Ok(entities
            .iter()
            .filter(|e| self.unfiltered || query.filter.as_ref().map_or(true, |p| p.matches(e)))
            .cloned()
            .collect())
    }
}

// ============================================================================
// MOCK TASK SERVICE
// ============================================================================

/// One recorded task submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub node_id: NodeId,
    pub operation: TaskOperation,
    pub payload: TaskPayload,
    pub task_id: TaskId,
}

#[derive(Debug, Default)]
struct TaskServiceState {
    /// Status sequence handed to every task submitted to a node
    scripts: HashMap<NodeId, Vec<TaskState>>,
    submit_failures: HashMap<NodeId, ConvoyError>,
    submit_delays: HashMap<NodeId, Duration>,
    status_failures: HashMap<NodeId, ConvoyError>,
    refresh_failure: Option<ConvoyError>,
    /// Remaining statuses per live task
    tasks: HashMap<TaskId, (NodeId, VecDeque<TaskState>)>,
    submissions: Vec<Submission>,
    status_calls: Vec<(TaskId, Instant)>,
    refreshes: Vec<NodeId>,
    pushed_states: Vec<(NodeId, Value)>,
    next_id: usize,
}

/// Task service whose tasks follow per-node scripted status sequences.
///
/// Each status query pops the next scripted state; the last one repeats.
/// Nodes without a script complete on the first query.
#[derive(Debug, Clone, Default)]
pub struct MockTaskService {
    state: Arc<RwLock<TaskServiceState>>,
}

impl MockTaskService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks on `node_id` report `states` in order.
    pub fn with_script(self, node_id: &str, states: Vec<TaskState>) -> Self {
        self.state
            .write()
            .unwrap()
            .scripts
            .insert(node_id.to_string(), states);
        self
    }

    /// Tasks on `node_id` stay pending `pending_polls` times, then complete.
    pub fn completing_after(self, node_id: &str, pending_polls: usize, auxiliary: Option<Value>) -> Self {
        let mut states = vec![TaskState::pending(); pending_polls];
        states.push(TaskState::complete(auxiliary));
        self.with_script(node_id, states)
    }

    /// Tasks on `node_id` stay pending `pending_polls` times, then fail.
    pub fn failing_after(self, node_id: &str, pending_polls: usize) -> Self {
        let mut states = vec![TaskState::pending(); pending_polls];
        states.push(TaskState::failed());
        self.with_script(node_id, states)
    }

    /// Submissions to `node_id` fail with `err`.
    pub fn rejecting_submit(self, node_id: &str, err: ConvoyError) -> Self {
        self.state
            .write()
            .unwrap()
            .submit_failures
            .insert(node_id.to_string(), err);
        self
    }

    /// Submissions to `node_id` take `delay` before answering.
    pub fn delaying_submit(self, node_id: &str, delay: Duration) -> Self {
        self.state
            .write()
            .unwrap()
            .submit_delays
            .insert(node_id.to_string(), delay);
        self
    }

    /// Status queries for tasks on `node_id` fail with `err`.
    pub fn failing_status(self, node_id: &str, err: ConvoyError) -> Self {
        self.state
            .write()
            .unwrap()
            .status_failures
            .insert(node_id.to_string(), err);
        self
    }

    /// Refresh and state pushes fail with `err`.
    pub fn failing_refresh(self, err: ConvoyError) -> Self {
        self.state.write().unwrap().refresh_failure = Some(err);
        self
    }

    /// Register a task directly, bypassing submission.
    pub fn insert_task(&self, node_id: &str, task_id: &str, states: Vec<TaskState>) {
        self.state
            .write()
            .unwrap()
            .tasks
            .insert(task_id.to_string(), (node_id.to_string(), states.into()));
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state.read().unwrap().submissions.clone()
    }

    /// Nodes that received a submission, in completion order.
    pub fn submitted_nodes(&self) -> Vec<NodeId> {
        self.submissions().into_iter().map(|s| s.node_id).collect()
    }

    /// Number of status queries made for `task_id`.
    pub fn status_calls(&self, task_id: &str) -> usize {
        self.status_call_times(task_id).len()
    }

    /// Instants at which `task_id` was queried.
    pub fn status_call_times(&self, task_id: &str) -> Vec<Instant> {
        self.state
            .read()
            .unwrap()
            .status_calls
            .iter()
            .filter(|(id, _)| id == task_id)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn total_status_calls(&self) -> usize {
        self.state.read().unwrap().status_calls.len()
    }

    pub fn refreshes(&self) -> Vec<NodeId> {
        self.state.read().unwrap().refreshes.clone()
    }

    pub fn pushed_states(&self) -> Vec<(NodeId, Value)> {
        self.state.read().unwrap().pushed_states.clone()
    }
}

#[async_trait]
impl TaskService for MockTaskService {
    async fn submit(
        &self,
        node_id: &str,
        operation: &TaskOperation,
        payload: &TaskPayload,
    ) -> ConvoyResult<TaskId> {
        let delay = self.state.read().unwrap().submit_delays.get(node_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().unwrap();
        if let Some(err) = state.submit_failures.get(node_id) {
            return Err(err.clone());
        }

        state.next_id += 1;
        let task_id = format!("task-{}-{}", node_id, state.next_id);
        let script = state
            .scripts
            .get(node_id)
            .cloned()
            .unwrap_or_else(|| vec![TaskState::complete(None)]);
        state
            .tasks
            .insert(task_id.clone(), (node_id.to_string(), script.into()));
        state.submissions.push(Submission {
            node_id: node_id.to_string(),
            operation: operation.clone(),
            payload: payload.clone(),
            task_id: task_id.clone(),
        });
        Ok(task_id)
    }

    async fn task_status(&self, task_id: &str) -> ConvoyResult<TaskState> {
        let mut state = self.state.write().unwrap();
        state.status_calls.push((task_id.to_string(), Instant::now()));

        let node_id = match state.tasks.get(task_id) {
            Some((node_id, _)) => node_id.clone(),
            None => return Err(transport_error("tasks", &format!("no such task {}", task_id))),
        };
        if let Some(err) = state.status_failures.get(&node_id) {
            return Err(err.clone());
        }

        let queue = match state.tasks.get_mut(task_id) {
            Some((_, queue)) => queue,
            None => return Err(transport_error("tasks", &format!("no such task {}", task_id))),
        };
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(next.unwrap_or_else(TaskState::pending))
    }

    async fn refresh_node(&self, node_id: &str) -> ConvoyResult<()> {
        let mut state = self.state.write().unwrap();
        if let Some(err) = state.refresh_failure.clone() {
            return Err(err);
        }
        state.refreshes.push(node_id.to_string());
        Ok(())
    }

    async fn push_node_state(&self, node_id: &str, value: &Value) -> ConvoyResult<()> {
        let mut state = self.state.write().unwrap();
        if let Some(err) = state.refresh_failure.clone() {
            return Err(err);
        }
        state.pushed_states.push((node_id.to_string(), value.clone()));
        Ok(())
    }
}

// ============================================================================
// MOCK RULE SERVICE
// ============================================================================

/// Rule service answering every request with a fixed response.
#[derive(Debug, Clone, Default)]
pub struct MockRuleService {
    response: Arc<RwLock<ResolveResponse>>,
    requests: Arc<RwLock<Vec<ResolveRequest>>>,
    failure: Arc<RwLock<Option<ConvoyError>>>,
}

impl MockRuleService {
    pub fn new(response: ResolveResponse) -> Self {
        Self {
            response: Arc::new(RwLock::new(response)),
            ..Self::default()
        }
    }

    pub fn failing_with(self, err: ConvoyError) -> Self {
        *self.failure.write().unwrap() = Some(err);
        self
    }

    pub fn requests(&self) -> Vec<ResolveRequest> {
        self.requests.read().unwrap().clone()
    }
}

#[async_trait]
impl RuleService for MockRuleService {
    async fn resolve(&self, request: &ResolveRequest) -> ConvoyResult<ResolveResponse> {
        self.requests.write().unwrap().push(request.clone());
        if let Some(err) = self.failure.read().unwrap().clone() {
            return Err(err);
        }
        Ok(self.response.read().unwrap().clone())
    }
}

// ============================================================================
// MOCK NIC SERVICE
// ============================================================================

/// NIC inventory keyed by owning node.
#[derive(Debug, Clone, Default)]
pub struct MockNicService {
    nics: Arc<RwLock<HashMap<NodeId, Vec<NicRecord>>>>,
    updates: Arc<RwLock<Vec<NicRecord>>>,
    deletes: Arc<RwLock<Vec<String>>>,
    failing_macs: Arc<RwLock<HashMap<String, ConvoyError>>>,
}

impl MockNicService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node_nics(self, node_id: &str, nics: Vec<NicRecord>) -> Self {
        self.nics.write().unwrap().insert(node_id.to_string(), nics);
        self
    }

    /// Writes touching `mac` fail with `err`.
    pub fn failing_mac(self, mac: &str, err: ConvoyError) -> Self {
        self.failing_macs.write().unwrap().insert(mac.to_string(), err);
        self
    }

    pub fn updates(&self) -> Vec<NicRecord> {
        self.updates.read().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.deletes.read().unwrap().clone()
    }

    fn check(&self, mac: &str) -> ConvoyResult<()> {
        match self.failing_macs.read().unwrap().get(mac) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl NicService for MockNicService {
    async fn list_nics(&self, node_id: &str) -> ConvoyResult<Vec<NicRecord>> {
        Ok(self
            .nics
            .read()
            .unwrap()
            .get(node_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_nic(&self, nic: &NicRecord) -> ConvoyResult<()> {
        self.check(&nic.mac)?;
        self.updates.write().unwrap().push(nic.clone());
        Ok(())
    }

    async fn delete_nic(&self, mac: &str) -> ConvoyResult<()> {
        self.check(mac)?;
        self.deletes.write().unwrap().push(mac.to_string());
        Ok(())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating convoy types.

    use super::*;
    use proptest::collection::{btree_map, btree_set, vec};
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    /// Identifier-like strings, including filter metacharacters.
    pub fn arb_identifier() -> impl Strategy<Value = String> {
        "[a-z0-9][a-z0-9*()\\-]{0,11}"
    }

    pub fn arb_node_id() -> impl Strategy<Value = NodeId> {
        (0..6u8).prop_map(|n| format!("node-{}", n))
    }

    pub fn arb_attribute_name() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("role".to_string()),
            Just("tier".to_string()),
            Just("env".to_string()),
            "[a-z]{1,8}",
        ]
    }

    pub fn arb_attribute_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            "[a-z]{1,6}".prop_map(Value::String),
            (0..1000i64).prop_map(Value::from),
            any::<bool>().prop_map(Value::Bool),
        ]
    }

    pub fn arb_entity() -> impl Strategy<Value = Entity> {
        (
            "vm-[0-9]{1,3}",
            prop_oneof![Just("owner-a".to_string()), Just("owner-b".to_string())],
            arb_node_id(),
            btree_map(arb_attribute_name(), arb_attribute_value(), 0..3),
            any::<bool>(),
        )
            .prop_map(|(identifier, owner_id, node_id, attributes, enabled)| Entity {
                identifier,
                owner_id,
                node_id,
                attributes,
                enabled,
                addresses: Vec::new(),
            })
    }

    /// Entities with unique identifiers.
    pub fn arb_fleet(max: usize) -> impl Strategy<Value = Vec<Entity>> {
        vec(arb_entity(), 0..max).prop_map(|entities| {
            let mut seen = BTreeSet::new();
            entities
                .into_iter()
                .filter(|e| seen.insert(e.identifier.clone()))
                .collect()
        })
    }

    pub fn arb_criterion() -> impl Strategy<Value = SelectionCriterion> {
        (
            btree_set("vm-[0-9]{1,3}", 0..4),
            btree_map(arb_attribute_name(), proptest::option::of(arb_attribute_value()), 0..3),
            prop::bool::weighted(0.1),
            proptest::option::of(prop_oneof![
                Just("owner-a".to_string()),
                Just("owner-b".to_string())
            ]),
        )
            .prop_map(|(identifiers, attributes, all, owner_id)| SelectionCriterion {
                identifiers,
                attributes,
                all,
                owner_id,
            })
    }

    pub fn arb_tag_set() -> impl Strategy<Value = BTreeSet<String>> {
        btree_set("[a-z]{1,6}", 0..6)
    }

    pub fn arb_merge_mode() -> impl Strategy<Value = MergeMode> {
        prop_oneof![
            Just(MergeMode::Replace),
            Just(MergeMode::Union),
            Just(MergeMode::Subtract),
        ]
    }

    pub fn arb_attribute_delta() -> impl Strategy<Value = AttributeDelta> {
        (arb_merge_mode(), arb_tag_set()).prop_map(|(mode, values)| AttributeDelta::new(mode, values))
    }

    pub fn arb_mac() -> impl Strategy<Value = String> {
        (0..16u8).prop_map(|n| format!("90:b8:d0:00:00:{:02x}", n))
    }

    pub fn arb_nic_record() -> impl Strategy<Value = NicRecord> {
        (arb_mac(), proptest::option::of(vec("[a-z]{1,6}", 0..4)))
            .prop_map(|(mac, nic_tags_provided)| NicRecord { mac, nic_tags_provided })
    }

    pub fn arb_task_status() -> impl Strategy<Value = TaskStatus> {
        prop_oneof![
            Just(TaskStatus::Pending),
            Just(TaskStatus::Complete),
            Just(TaskStatus::Failed),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;
    use serde_json::json;

    /// Config pointing every service at a local address with a short poll interval.
    pub fn test_config() -> ConvoyConfig {
        ConvoyConfig {
            services: ServiceEndpoints {
                inventory_url: Some("http://127.0.0.1:8081".to_string()),
                task_url: Some("http://127.0.0.1:8082".to_string()),
                rule_url: Some("http://127.0.0.1:8083".to_string()),
                nic_url: Some("http://127.0.0.1:8084".to_string()),
            },
            poll: fast_poll(),
            request_timeout: Duration::from_secs(5),
        }
    }

    /// 10ms poll interval with a one minute bound.
    pub fn fast_poll() -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(10),
            timeout: Some(Duration::from_secs(60)),
        }
    }

    pub fn vm(id: &str, owner: &str, node: &str) -> Entity {
        Entity::new(id, owner, node).with_enabled(true)
    }

    /// Three web/db VMs owned by `o1` across nodes n1..n3, plus one VM of
    /// another owner on n3.
    pub fn three_node_fleet() -> Vec<Entity> {
        vec![
            vm("v1", "o1", "n1")
                .with_attribute("role", json!("web"))
                .with_address("10.0.0.1"),
            vm("v2", "o1", "n2")
                .with_attribute("role", json!("db"))
                .with_address("10.0.0.2"),
            vm("v3", "o1", "n3")
                .with_attribute("role", json!("web"))
                .with_address("10.0.0.3"),
            vm("v4", "o2", "n3").with_address("10.0.1.4"),
        ]
    }

    pub fn nic(mac: &str, tags: &[&str]) -> NicRecord {
        NicRecord::new(mac, tags.iter().copied())
    }

    pub fn handle(node: &str, task: &str) -> TaskHandle {
        TaskHandle::pending(node, task)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for convoy-specific validation.

    use super::*;

    /// Assert that a ConvoyResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &ConvoyResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert an unknown-entities resolution error listing exactly `ids`.
    #[track_caller]
    pub fn assert_unknown_entities<T: std::fmt::Debug>(result: &ConvoyResult<T>, ids: &[&str]) {
        match result {
            Err(ConvoyError::Resolution(ResolutionError::UnknownEntities { ids: got })) => {
                let expected: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
                assert_eq!(*got, expected, "Wrong identifiers in UnknownEntities");
            }
            other => panic!("Expected UnknownEntities error, got: {:?}", other),
        }
    }

    /// Assert that an error is a remote task failure naming `task_id` and `node_id`.
    #[track_caller]
    pub fn assert_task_failed(err: &ConvoyError, task_id: &str, node_id: &str) {
        match err {
            ConvoyError::Task(TaskError::Failed {
                task_id: t,
                node_id: n,
            }) => {
                assert_eq!(t, task_id);
                assert_eq!(n, node_id);
            }
            other => panic!("Expected task failure, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_transport_error<T: std::fmt::Debug>(result: &ConvoyResult<T>) {
        match result {
            Err(ConvoyError::Transport(_)) => {}
            other => panic!("Expected Transport error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &ConvoyResult<T>) {
        match result {
            Err(ConvoyError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &ConvoyResult<T>) {
        match result {
            Err(ConvoyError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    /// Assert that handles are recorded with the given terminal status.
    #[track_caller]
    pub fn assert_all_status(handles: &[TaskHandle], status: TaskStatus) {
        for handle in handles {
            assert_eq!(
                handle.status, status,
                "Handle {}/{} has status {:?}",
                handle.node_id, handle.task_id, handle.status
            );
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
