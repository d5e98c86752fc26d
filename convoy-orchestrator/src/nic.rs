//! NIC tag workflow.
//!
//! Request parameters are validated into [`NicRecord`] deltas, merged against
//! the NICs the node currently owns, written back to the NIC inventory and
//! finally pushed to the node as a `nics/update` task.

use convoy_core::{
    merge_batch, ConvoyError, ConvoyResult, MergeMode, NicRecord, NicService, RunId, Service,
    Stage, TaskPayload, TransportError, ValidationError,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::{Id, JoinSet};
use tracing::{debug, error, info, warn};

// ============================================================================
// VALIDATION
// ============================================================================

fn invalid_nics(reason: &str) -> ConvoyError {
    ValidationError::InvalidValue {
        field: "nics".to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Turn raw `nics` request parameters into NIC deltas.
///
/// Elements without both `mac` and `nic_tags_provided` are dropped with a
/// warning.
pub fn validate_nic_params(raw: Option<&Value>) -> ConvoyResult<Stage<Vec<NicRecord>>> {
    let Some(raw) = raw.filter(|v| !v.is_null()) else {
        return Ok(Stage::noop(Vec::new(), "No nics specified"));
    };
    let Some(elements) = raw.as_array() else {
        return Err(invalid_nics("nics object must be an array"));
    };

    let mut nics = Vec::with_capacity(elements.len());
    for element in elements {
        let Some(object) = element.as_object() else {
            return Err(invalid_nics("nics object must be an array of objects"));
        };
        let (Some(mac), Some(tags)) = (object.get("mac"), object.get("nic_tags_provided")) else {
            warn!(nic = %element, "dropping nic without mac or nic_tags_provided");
            continue;
        };
        let Some(mac) = mac.as_str() else {
            return Err(invalid_nics("mac must be a string"));
        };
        let tags: Vec<String> = match tags.as_array() {
            Some(tags) => tags
                .iter()
                .map(|t| t.as_str().map(str::to_string))
                .collect::<Option<_>>()
                .ok_or_else(|| invalid_nics("nic_tags_provided must be an array of strings"))?,
            None => return Err(invalid_nics("nic_tags_provided must be an array of strings")),
        };
        nics.push(NicRecord::new(mac, tags));
    }

    Ok(Stage::done(nics, "nic parameters OK"))
}

/// Parse the requested NIC action.
pub fn parse_nic_action(mode: Option<&str>) -> ConvoyResult<MergeMode> {
    match mode {
        Some(mode) => mode.parse(),
        None => Err(ValidationError::RequiredFieldMissing {
            field: "mode".to_string(),
        }
        .into()),
    }
}

// ============================================================================
// READ / MERGE
// ============================================================================

/// NICs currently belonging to `node_id`.
pub async fn node_nics(nics: &dyn NicService, node_id: &str) -> ConvoyResult<Stage<Vec<NicRecord>>> {
    let found = nics.list_nics(node_id).await.map_err(|err| {
        error!(node_id, error = %err, "error listing node nics");
        err
    })?;
    debug!(node_id, count = found.len(), "retrieved node nics");
    let summary = format!("{} nics retrieved for node {}", found.len(), node_id);
    Ok(Stage::done(found, summary))
}

/// Merge `deltas` into the node's `existing` NICs.
///
/// The returned records carry the complete resulting tag set of every NIC a
/// delta applied to. Deltas naming unknown MACs are skipped.
pub fn apply_nic_updates(
    existing: &[NicRecord],
    deltas: &[NicRecord],
    mode: MergeMode,
) -> Stage<Vec<NicRecord>> {
    if deltas.is_empty() {
        return Stage::noop(Vec::new(), "No nics to get changes for");
    }

    let batch = merge_batch(existing, deltas, mode);
    let summary = format!("applied nic {}s", mode);
    info!(
        merged = batch.merged.len(),
        skipped = batch.skipped.len(),
        nics = ?batch.merged,
        "{}",
        summary
    );
    Stage::done(batch.merged, summary)
}

// ============================================================================
// WRITES
// ============================================================================

#[derive(Debug, Clone)]
enum NicWrite {
    Update(NicRecord),
    Delete(String),
}

impl NicWrite {
    fn mac(&self) -> &str {
        match self {
            Self::Update(nic) => &nic.mac,
            Self::Delete(mac) => mac,
        }
    }
}

/// Run every write concurrently; the first failure cancels the rest.
async fn write_all(service: &Arc<dyn NicService>, writes: Vec<NicWrite>) -> ConvoyResult<()> {
    let mut set = JoinSet::new();
    let mut spawned: HashMap<Id, String> = HashMap::new();
    for write in writes {
        let service = Arc::clone(service);
        let mac = write.mac().to_string();
        let abort = set.spawn(async move {
            let outcome = match &write {
                NicWrite::Update(nic) => service.update_nic(nic).await,
                NicWrite::Delete(mac) => service.delete_nic(mac).await,
            };
            match &outcome {
                Ok(()) => debug!(mac = write.mac(), ?write, "nic written"),
                Err(err) => error!(mac = write.mac(), error = %err, "error writing nic"),
            }
            outcome
        });
        spawned.insert(abort.id(), mac);
    }

    while let Some(joined) = set.join_next_with_id().await {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((_, Err(err))) => {
                set.abort_all();
                return Err(err);
            }
            Err(join_err) => {
                set.abort_all();
                let mac = spawned.remove(&join_err.id()).unwrap_or_default();
                return Err(TransportError::Unreachable {
                    service: Service::Nic.to_string(),
                    reason: format!("write for nic {} aborted: {}", mac, join_err),
                }
                .into());
            }
        }
    }
    Ok(())
}

/// Write the given NICs to the NIC inventory.
pub async fn update_nics(service: &Arc<dyn NicService>, nics: &[NicRecord]) -> ConvoyResult<Stage<()>> {
    if nics.is_empty() {
        return Ok(Stage::noop((), "No nics to update"));
    }
    write_all(service, nics.iter().cloned().map(NicWrite::Update).collect()).await?;
    info!(count = nics.len(), "nics updated successfully");
    Ok(Stage::done((), "nics updated successfully"))
}

/// Remove the given NICs from the NIC inventory.
pub async fn delete_nics(service: &Arc<dyn NicService>, nics: &[NicRecord]) -> ConvoyResult<Stage<()>> {
    if nics.is_empty() {
        return Ok(Stage::noop((), "No nics to delete"));
    }
    write_all(service, nics.iter().map(|n| NicWrite::Delete(n.mac.clone())).collect()).await?;
    info!(count = nics.len(), "nics deleted successfully");
    Ok(Stage::done((), "nics deleted successfully"))
}

/// `nics/update` task payload.
pub fn nic_payload(run_id: RunId, nics: &[NicRecord]) -> TaskPayload {
    TaskPayload::new(run_id).with_nics(nics.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_core::new_run_id;
    use convoy_test_utils::{assertions, fixtures, transport_error, MockNicService};
    use serde_json::json;

    fn service(mock: &MockNicService) -> Arc<dyn NicService> {
        Arc::new(mock.clone())
    }

    // ------------------------------------------------------------------------
    // validate_nic_params
    // ------------------------------------------------------------------------

    #[test]
    fn test_validate_absent_is_noop() {
        let stage = validate_nic_params(None).unwrap();
        assert!(stage.noop);
        assert_eq!(stage.summary, "No nics specified");
        assert!(validate_nic_params(Some(&Value::Null)).unwrap().noop);
    }

    #[test]
    fn test_validate_rejects_non_array() {
        let result = validate_nic_params(Some(&json!({"mac": "aa"})));
        assertions::assert_validation_error(&result);
    }

    #[test]
    fn test_validate_rejects_non_object_element() {
        let result = validate_nic_params(Some(&json!([{"mac": "aa", "nic_tags_provided": []}, "bb"])));
        assertions::assert_validation_error(&result);
        let nested = validate_nic_params(Some(&json!([["aa"]])));
        assertions::assert_validation_error(&nested);
    }

    #[test]
    fn test_validate_drops_incomplete_elements() {
        let raw = json!([
            {"mac": "aa", "nic_tags_provided": ["admin"], "ip": "10.0.0.1"},
            {"mac": "bb"},
            {"nic_tags_provided": ["external"]},
        ]);
        let stage = validate_nic_params(Some(&raw)).unwrap();
        assert_eq!(stage.value, vec![fixtures::nic("aa", &["admin"])]);
    }

    #[test]
    fn test_parse_nic_action() {
        assert_eq!(parse_nic_action(Some("update")).unwrap(), MergeMode::Union);
        assert_eq!(parse_nic_action(Some("delete")).unwrap(), MergeMode::Subtract);
        assertions::assert_validation_error(&parse_nic_action(None));
        assertions::assert_validation_error(&parse_nic_action(Some("append")));
    }

    // ------------------------------------------------------------------------
    // apply_nic_updates
    // ------------------------------------------------------------------------

    #[test]
    fn test_apply_union() {
        let existing = vec![fixtures::nic("aa", &["a", "b"]), fixtures::nic("cc", &["x"])];
        let deltas = vec![fixtures::nic("aa", &["b", "c"])];
        let stage = apply_nic_updates(&existing, &deltas, MergeMode::Union);
        assert_eq!(stage.value, vec![fixtures::nic("aa", &["a", "b", "c"])]);
        assert_eq!(stage.summary, "applied nic unions");
    }

    #[test]
    fn test_apply_subtract() {
        let existing = vec![fixtures::nic("aa", &["a", "b"])];
        let deltas = vec![fixtures::nic("aa", &["b"])];
        let stage = apply_nic_updates(&existing, &deltas, MergeMode::Subtract);
        assert_eq!(stage.value, vec![fixtures::nic("aa", &["a"])]);
    }

    #[test]
    fn test_apply_skips_unknown_mac() {
        let existing = vec![fixtures::nic("aa", &["a"])];
        let deltas = vec![fixtures::nic("zz", &["b"]), fixtures::nic("aa", &["b"])];
        let stage = apply_nic_updates(&existing, &deltas, MergeMode::Replace);
        assert_eq!(stage.value, vec![fixtures::nic("aa", &["b"])]);
    }

    #[test]
    fn test_apply_empty_deltas_is_noop() {
        let stage = apply_nic_updates(&[fixtures::nic("aa", &["a"])], &[], MergeMode::Union);
        assert!(stage.noop);
        assert!(stage.value.is_empty());
    }

    // ------------------------------------------------------------------------
    // NIC inventory access
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_node_nics() {
        let mock = MockNicService::new().with_node_nics("n1", vec![fixtures::nic("aa", &["a"])]);
        let stage = node_nics(&mock, "n1").await.unwrap();
        assert_eq!(stage.value.len(), 1);
        assert!(node_nics(&mock, "n2").await.unwrap().value.is_empty());
    }

    #[tokio::test]
    async fn test_update_nics_writes_every_record() {
        let mock = MockNicService::new();
        let nics = vec![fixtures::nic("aa", &["a"]), fixtures::nic("bb", &["b"])];
        let stage = update_nics(&service(&mock), &nics).await.unwrap();
        assert_eq!(stage.summary, "nics updated successfully");
        let mut written: Vec<String> = mock.updates().into_iter().map(|n| n.mac).collect();
        written.sort();
        assert_eq!(written, vec!["aa", "bb"]);
    }

    #[tokio::test]
    async fn test_update_nics_empty_is_noop() {
        let mock = MockNicService::new();
        let stage = update_nics(&service(&mock), &[]).await.unwrap();
        assert!(stage.noop);
        assert!(mock.updates().is_empty());
    }

    #[tokio::test]
    async fn test_update_nics_fails_fast() {
        let mock = MockNicService::new().failing_mac("bb", transport_error("nics", "409"));
        let nics = vec![fixtures::nic("aa", &["a"]), fixtures::nic("bb", &["b"])];
        let result = update_nics(&service(&mock), &nics).await;
        assertions::assert_transport_error(&result);
    }

    #[tokio::test]
    async fn test_delete_nics() {
        let mock = MockNicService::new();
        delete_nics(&service(&mock), &[fixtures::nic("aa", &[])]).await.unwrap();
        assert_eq!(mock.deletes(), vec!["aa".to_string()]);
        assert!(delete_nics(&service(&mock), &[]).await.unwrap().noop);
    }

    #[test]
    fn test_nic_payload() {
        let run_id = new_run_id();
        let payload = nic_payload(run_id, &[fixtures::nic("aa", &["a"])]);
        assert_eq!(payload.nics, Some(vec![fixtures::nic("aa", &["a"])]));
        assert_eq!(payload.rules, None);
    }
}
