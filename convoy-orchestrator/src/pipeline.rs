//! End-to-end pipelines.
//!
//! Every pipeline passes each stage's output explicitly to the next stage and
//! records the stage summaries in the run's [`RunReport`].

use crate::dispatch::{exclude_node, firewall_payload, TaskDispatcher};
use crate::nic::{
    apply_nic_updates, nic_payload, node_nics, parse_nic_action, update_nics, validate_nic_params,
};
use crate::policy::{build_payload, AttributeContext, ChangeKind, PolicyResolution, RuleResolver};
use crate::poll::PollEngine;
use crate::refresh::refresh_node_state;
use crate::resolver::TargetResolver;
use chrono::Utc;
use convoy_clients::{InventoryClient, NicClient, RuleClient, TaskClient};
use convoy_core::{
    new_run_id, ConfigError, ConvoyConfig, ConvoyResult, Entity, FirewallData, InventoryService,
    NicService, NodeId, OrchestrationResult, PollConfig, Rule, RuleService, RunId,
    SelectionCriterion, Service, Stage, TaskHandle, TaskOperation, TaskService, Timestamp,
    ValidationError, WorkingSet,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info};

// ============================================================================
// REQUESTS
// ============================================================================

/// Push a rule to every node hosting an entity the criterion selects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirewallUpdateRequest {
    pub criterion: SelectionCriterion,
    #[serde(default)]
    pub rule: Option<Rule>,
    /// Node already holding the change, left out of the dispatch
    #[serde(default)]
    pub exclude_node: Option<NodeId>,
}

/// Firewall data for an entity being created or updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityChangeRequest {
    pub entity: Entity,
    #[serde(default)]
    pub context: AttributeContext,
}

/// NIC tag change on one node. `nics` is taken as raw JSON and validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NicUpdateRequest {
    pub node_id: NodeId,
    #[serde(default)]
    pub nics: Option<Value>,
    /// `replace`, `update` or `delete`
    #[serde(default)]
    pub mode: Option<String>,
}

// ============================================================================
// RUN REPORT
// ============================================================================

/// Everything one successful run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run_id: RunId,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    pub working_set: WorkingSet,
    /// Firewall data computed for the changing entity's node
    pub firewall: Option<FirewallData>,
    pub handles: Vec<TaskHandle>,
    pub result: OrchestrationResult,
    /// Stage summaries in execution order
    pub messages: Vec<String>,
}

/// Accumulates stage summaries for a run.
struct RunLog {
    run_id: RunId,
    started_at: Timestamp,
    messages: Vec<String>,
}

impl RunLog {
    fn start(pipeline: &'static str) -> Self {
        let run_id = new_run_id();
        info!(%run_id, pipeline, "run started");
        Self {
            run_id,
            started_at: Utc::now(),
            messages: Vec::new(),
        }
    }

    fn record<T>(&mut self, stage_name: &'static str, stage: Stage<T>) -> T {
        info!(run_id = %self.run_id, stage = stage_name, noop = stage.noop, "{}", stage.summary);
        self.messages.push(stage.summary);
        stage.value
    }

    fn finish(
        self,
        working_set: WorkingSet,
        firewall: Option<FirewallData>,
        handles: Vec<TaskHandle>,
        result: OrchestrationResult,
    ) -> RunReport {
        let finished_at = Utc::now();
        info!(
            run_id = %self.run_id,
            elapsed_ms = (finished_at - self.started_at).num_milliseconds(),
            "run finished"
        );
        RunReport {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at,
            working_set,
            firewall,
            handles,
            result,
            messages: self.messages,
        }
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

fn require<T: ?Sized>(service: &Option<Arc<T>>, which: Service) -> ConvoyResult<Arc<T>> {
    service.clone().ok_or_else(|| {
        ConfigError::MissingRequired {
            field: which.field().to_string(),
        }
        .into()
    })
}

/// Runs pipelines against a set of remote services.
///
/// Only the task service is mandatory; a pipeline needing another service
/// fails with a configuration error when it was not provided.
#[derive(Clone)]
pub struct Orchestrator {
    tasks: Arc<dyn TaskService>,
    inventory: Option<Arc<dyn InventoryService>>,
    rules: Option<Arc<dyn RuleService>>,
    nics: Option<Arc<dyn NicService>>,
    poll: PollConfig,
}

impl Orchestrator {
    pub fn new(tasks: Arc<dyn TaskService>, poll: PollConfig) -> Self {
        Self {
            tasks,
            inventory: None,
            rules: None,
            nics: None,
            poll,
        }
    }

    pub fn with_inventory(mut self, inventory: Arc<dyn InventoryService>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    pub fn with_rules(mut self, rules: Arc<dyn RuleService>) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn with_nics(mut self, nics: Arc<dyn NicService>) -> Self {
        self.nics = Some(nics);
        self
    }

    /// HTTP-backed orchestrator. Services without a configured URL are left out.
    pub fn from_config(config: &ConvoyConfig) -> ConvoyResult<Self> {
        config.validate()?;
        let mut orchestrator = Self::new(Arc::new(TaskClient::from_config(config)?), config.poll.clone());
        if config.services.get(Service::Inventory).is_some() {
            orchestrator = orchestrator.with_inventory(Arc::new(InventoryClient::from_config(config)?));
        }
        if config.services.get(Service::Rule).is_some() {
            orchestrator = orchestrator.with_rules(Arc::new(RuleClient::from_config(config)?));
        }
        if config.services.get(Service::Nic).is_some() {
            orchestrator = orchestrator.with_nics(Arc::new(NicClient::from_config(config)?));
        }
        Ok(orchestrator)
    }

    async fn poll_stage(&self, log: &mut RunLog, handles: Vec<TaskHandle>) -> ConvoyResult<OrchestrationResult> {
        let result = PollEngine::new(Arc::clone(&self.tasks), self.poll.clone())
            .poll_all(handles)
            .await;
        log.messages.push(result.summary.clone());
        if let Some(err) = &result.error {
            error!(
                run_id = %log.run_id,
                failed = ?result.failed.iter().map(|h| h.node_id.as_str()).collect::<Vec<_>>(),
                error = %err,
                "run failed"
            );
        }
        result.into_result()
    }

    /// Resolve targets, drop the excluded node, push `fw/update` and poll.
    pub async fn firewall_update(&self, request: FirewallUpdateRequest) -> ConvoyResult<RunReport> {
        let inventory = require(&self.inventory, Service::Inventory)?;
        let mut log = RunLog::start("firewall_update");
        let run_id = log.run_id;

        let working_set = log.record(
            "resolve",
            TargetResolver::new(inventory)
                .resolve(&request.criterion, None)
                .await?,
        );
        let nodes = log.record(
            "filter",
            exclude_node(&working_set.matched_node_ids, request.exclude_node.as_deref()),
        );

        let rules: Option<Vec<Rule>> = request.rule.map(|rule| vec![rule]);
        let handles = log.record(
            "dispatch",
            TaskDispatcher::new(Arc::clone(&self.tasks))
                .dispatch(&nodes, &TaskOperation::FirewallUpdate, |node| {
                    firewall_payload(run_id, rules.as_deref(), &working_set.matched_entities, node)
                })
                .await?,
        );
        let result = self.poll_stage(&mut log, handles.clone()).await?;
        Ok(log.finish(working_set, None, handles, result))
    }

    /// Compute firewall data for an entity being created or updated and tell
    /// every other node hosting a referenced entity about the change.
    pub async fn provision_firewall(&self, request: EntityChangeRequest) -> ConvoyResult<RunReport> {
        let rules = require(&self.rules, Service::Rule)?;
        let inventory = require(&self.inventory, Service::Inventory)?;
        let mut log = RunLog::start("provision_firewall");
        let run_id = log.run_id;
        let EntityChangeRequest { entity, context } = request;

        let resolution = log.record(
            "resolve_rules",
            RuleResolver::new(rules).resolve_policy(&entity, &context).await?,
        );
        let policy = match resolution {
            PolicyResolution::Resolved(policy) => policy,
            PolicyResolution::NothingToResolve => {
                return Ok(log.finish(WorkingSet::default(), None, Vec::new(), OrchestrationResult::default()));
            }
        };

        let known = match context.kind {
            ChangeKind::Create => Some(vec![entity.clone()]),
            ChangeKind::Update => None,
        };
        let working_set = log.record(
            "resolve",
            TargetResolver::new(inventory)
                .resolve(&policy.referenced, known.as_deref())
                .await?,
        );

        let payload = log.record("populate", build_payload(&policy, &entity.node_id, &working_set));

        let mut notified: Vec<Entity> = working_set.matched_entities.clone();
        if context.kind == ChangeKind::Create && !notified.iter().any(|e| e.identifier == entity.identifier) {
            notified.push(entity.clone());
        }
        let handles = log.record(
            "dispatch",
            TaskDispatcher::new(Arc::clone(&self.tasks))
                .dispatch(&payload.target_nodes, &TaskOperation::FirewallUpdate, |node| {
                    firewall_payload(run_id, None, &notified, node)
                })
                .await?,
        );
        let result = self.poll_stage(&mut log, handles.clone()).await?;
        Ok(log.finish(working_set, payload.firewall, handles, result))
    }

    /// Merge NIC tag changes into a node's NICs, persist them, push them to
    /// the node and refresh the node's reported state.
    pub async fn nic_tag_update(&self, request: NicUpdateRequest) -> ConvoyResult<RunReport> {
        let nics = require(&self.nics, Service::Nic)?;
        if request.node_id.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "node_id".to_string(),
            }
            .into());
        }
        let mut log = RunLog::start("nic_tag_update");
        let run_id = log.run_id;
        let node_id = request.node_id;

        let deltas = log.record("validate", validate_nic_params(request.nics.as_ref())?);
        if deltas.is_empty() {
            return Ok(log.finish(WorkingSet::default(), None, Vec::new(), OrchestrationResult::default()));
        }
        let mode = parse_nic_action(request.mode.as_deref())?;

        let existing = log.record("list_nics", node_nics(nics.as_ref(), &node_id).await?);
        let merged = log.record("merge", apply_nic_updates(&existing, &deltas, mode));
        log.record("update_nics", update_nics(&nics, &merged).await?);
        if merged.is_empty() {
            return Ok(log.finish(WorkingSet::default(), None, Vec::new(), OrchestrationResult::default()));
        }

        let nodes = BTreeSet::from([node_id.clone()]);
        let handles = log.record(
            "dispatch",
            TaskDispatcher::new(Arc::clone(&self.tasks))
                .dispatch(&nodes, &TaskOperation::NicUpdate, |_| nic_payload(run_id, &merged))
                .await?,
        );
        let result = self.poll_stage(&mut log, handles.clone()).await?;

        log.record(
            "refresh",
            refresh_node_state(self.tasks.as_ref(), &node_id, result.observed_state.get(&node_id)).await?,
        );
        Ok(log.finish(WorkingSet::default(), None, handles, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_core::{ResolveResponse, TaskStatus};
    use convoy_test_utils::{
        assertions, fixtures, MockInventory, MockNicService, MockRuleService, MockTaskService,
    };
    use serde_json::json;

    fn orchestrator(tasks: &MockTaskService) -> Orchestrator {
        Orchestrator::new(Arc::new(tasks.clone()), fixtures::fast_poll())
    }

    #[tokio::test]
    async fn test_missing_service_is_config_error() {
        let tasks = MockTaskService::new();
        let result = orchestrator(&tasks)
            .firewall_update(FirewallUpdateRequest {
                criterion: SelectionCriterion::all(),
                rule: None,
                exclude_node: None,
            })
            .await;
        assertions::assert_config_error(&result);
        assert!(tasks.submissions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_firewall_update_excludes_node() {
        let tasks = MockTaskService::new();
        let inventory = MockInventory::new(fixtures::three_node_fleet());
        let report = orchestrator(&tasks)
            .with_inventory(Arc::new(inventory))
            .firewall_update(FirewallUpdateRequest {
                criterion: SelectionCriterion::by_attribute_names(["role"]),
                rule: Some(json!("FROM tag role TO tag role ALLOW tcp PORT 80")),
                exclude_node: Some("n1".to_string()),
            })
            .await
            .unwrap();

        let nodes: Vec<_> = report.handles.iter().map(|h| h.node_id.as_str()).collect();
        assert_eq!(nodes, vec!["n2", "n3"]);
        assert!(report.result.is_success());
        assertions::assert_all_status(&report.result.succeeded, TaskStatus::Complete);
        for submission in tasks.submissions() {
            assert_eq!(submission.payload.rules.as_ref().map(Vec::len), Some(1));
            assert_eq!(submission.payload.run_id, report.run_id);
        }
        assert!(report.finished_at >= report.started_at);
        assert_eq!(report.messages.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_poll_ends_run_with_error() {
        let tasks = MockTaskService::new().failing_after("n2", 1);
        let inventory = MockInventory::new(fixtures::three_node_fleet());
        let result = orchestrator(&tasks)
            .with_inventory(Arc::new(inventory))
            .firewall_update(FirewallUpdateRequest {
                criterion: SelectionCriterion::by_identifiers(["v1", "v2"]),
                rule: None,
                exclude_node: None,
            })
            .await;
        let err = result.unwrap_err();
        let task_id = tasks
            .submissions()
            .into_iter()
            .find(|s| s.node_id == "n2")
            .map(|s| s.task_id)
            .unwrap();
        assertions::assert_task_failed(&err, &task_id, "n2");
    }

    #[tokio::test]
    async fn test_provision_update_without_changes_is_noop() {
        let tasks = MockTaskService::new();
        let rules = MockRuleService::new(ResolveResponse::default());
        let report = orchestrator(&tasks)
            .with_rules(Arc::new(rules.clone()))
            .with_inventory(Arc::new(MockInventory::new(Vec::new())))
            .provision_firewall(EntityChangeRequest {
                entity: fixtures::vm("v9", "o1", "n1"),
                context: AttributeContext {
                    kind: ChangeKind::Update,
                    ..Default::default()
                },
            })
            .await
            .unwrap();
        assert!(report.handles.is_empty());
        assert!(rules.requests().is_empty());
        assert!(tasks.submissions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_nic_tag_update_pipeline() {
        let tasks = MockTaskService::new().completing_after("n1", 1, Some(json!({"sysinfo": "fresh"})));
        let nics = MockNicService::new().with_node_nics(
            "n1",
            vec![fixtures::nic("aa", &["admin"]), fixtures::nic("bb", &["external"])],
        );
        let report = orchestrator(&tasks)
            .with_nics(Arc::new(nics.clone()))
            .nic_tag_update(NicUpdateRequest {
                node_id: "n1".to_string(),
                nics: Some(json!([{"mac": "aa", "nic_tags_provided": ["internal"]}])),
                mode: Some("update".to_string()),
            })
            .await
            .unwrap();

        let expected = fixtures::nic("aa", &["admin", "internal"]);
        assert_eq!(nics.updates(), vec![expected.clone()]);
        let submissions = tasks.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].operation, TaskOperation::NicUpdate);
        assert_eq!(submissions[0].payload.nics, Some(vec![expected]));
        assert_eq!(
            tasks.pushed_states(),
            vec![("n1".to_string(), json!({"sysinfo": "fresh"}))]
        );
        assert!(report.result.is_success());
    }

    #[tokio::test]
    async fn test_nic_tag_update_requires_mode() {
        let tasks = MockTaskService::new();
        let result = orchestrator(&tasks)
            .with_nics(Arc::new(MockNicService::new()))
            .nic_tag_update(NicUpdateRequest {
                node_id: "n1".to_string(),
                nics: Some(json!([{"mac": "aa", "nic_tags_provided": []}])),
                mode: None,
            })
            .await;
        assertions::assert_validation_error(&result);
    }

    #[tokio::test]
    async fn test_nic_tag_update_requires_node_id() {
        let tasks = MockTaskService::new();
        let nics = MockNicService::new().with_node_nics("", vec![fixtures::nic("aa", &["admin"])]);
        for node_id in ["", "  "] {
            let result = orchestrator(&tasks)
                .with_nics(Arc::new(nics.clone()))
                .nic_tag_update(NicUpdateRequest {
                    node_id: node_id.to_string(),
                    nics: Some(json!([{"mac": "aa", "nic_tags_provided": ["internal"]}])),
                    mode: Some("update".to_string()),
                })
                .await;
            assertions::assert_validation_error(&result);
        }
        assert!(nics.updates().is_empty());
        assert!(tasks.submissions().is_empty());
        assert!(tasks.refreshes().is_empty());
    }

    #[tokio::test]
    async fn test_nic_tag_update_without_nics_is_noop() {
        let tasks = MockTaskService::new();
        let report = orchestrator(&tasks)
            .with_nics(Arc::new(MockNicService::new()))
            .nic_tag_update(NicUpdateRequest {
                node_id: "n1".to_string(),
                nics: None,
                mode: None,
            })
            .await
            .unwrap();
        assert_eq!(report.messages, vec!["No nics specified".to_string()]);
        assert!(tasks.refreshes().is_empty());
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: FirewallUpdateRequest =
            serde_json::from_value(json!({"criterion": {"identifiers": ["v1"]}})).unwrap();
        assert_eq!(request.rule, None);
        assert_eq!(request.exclude_node, None);
        assert!(request.criterion.identifiers.contains("v1"));
    }
}
