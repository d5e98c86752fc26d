//! Declarative attribute-set merging
//!
//! A delta is expressed as a mode plus a value set and is applied against
//! whatever attribute set an entity currently has.

use crate::{ConvoyError, NicRecord, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

// ============================================================================
// MERGE MODE
// ============================================================================

/// How a delta combines with an existing attribute set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    /// Result is exactly the delta values
    Replace,
    /// Result is existing plus delta values
    #[serde(alias = "update")]
    Union,
    /// Result is existing minus delta values
    #[serde(alias = "delete")]
    Subtract,
}

impl MergeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::Union => "union",
            Self::Subtract => "subtract",
        }
    }
}

impl FromStr for MergeMode {
    type Err = ConvoyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "union" | "update" => Ok(Self::Union),
            "subtract" | "delete" => Ok(Self::Subtract),
            _ => Err(ValidationError::UnknownMergeMode {
                mode: s.to_string(),
            }
            .into()),
        }
    }
}

impl std::fmt::Display for MergeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ATTRIBUTE DELTA
// ============================================================================

/// A requested change to an attribute set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDelta {
    pub mode: MergeMode,
    pub values: BTreeSet<String>,
}

impl AttributeDelta {
    pub fn new<I, S>(mode: MergeMode, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode,
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// Apply `delta` to `existing`.
pub fn merge(existing: &BTreeSet<String>, delta: &AttributeDelta) -> BTreeSet<String> {
    match delta.mode {
        MergeMode::Replace => delta.values.clone(),
        MergeMode::Union => existing.union(&delta.values).cloned().collect(),
        MergeMode::Subtract => existing.difference(&delta.values).cloned().collect(),
    }
}

// ============================================================================
// BATCH MERGE
// ============================================================================

/// Why a delta in a batch was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// The delta names no known entity
    UnknownEntity,
    /// The delta carries no attribute set
    MissingAttributes,
}

/// Output of [`merge_batch`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeBatch {
    /// One merged record per matched entity with a usable delta
    pub merged: Vec<NicRecord>,
    /// Deltas that were skipped, keyed by their MAC
    pub skipped: Vec<(String, SkipReason)>,
}

/// Apply per-entity deltas to a batch of existing NIC records.
///
/// Deltas for unknown MACs or without `nic_tags_provided` are skipped with a
/// warning; the rest of the batch still proceeds. Several deltas for the
/// same MAC are applied in order. Output follows the order of `existing`.
pub fn merge_batch(existing: &[NicRecord], deltas: &[NicRecord], mode: MergeMode) -> MergeBatch {
    let mut current: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
    let mut touched: BTreeSet<String> = BTreeSet::new();
    let mut skipped = Vec::new();

    for nic in existing {
        current.insert(nic.mac.as_str(), nic.tag_set());
    }

    for delta in deltas {
        let Some(tags) = current.get_mut(delta.mac.as_str()) else {
            tracing::warn!(mac = %delta.mac, "missing mac or unknown nic, skipping");
            skipped.push((delta.mac.clone(), SkipReason::UnknownEntity));
            continue;
        };
        let Some(values) = &delta.nic_tags_provided else {
            tracing::warn!(mac = %delta.mac, "delta missing nic_tags_provided, skipping");
            skipped.push((delta.mac.clone(), SkipReason::MissingAttributes));
            continue;
        };

        *tags = merge(tags, &AttributeDelta::new(mode, values.iter().cloned()));
        touched.insert(delta.mac.clone());
    }

    let merged = existing
        .iter()
        .filter(|nic| touched.remove(nic.mac.as_str()))
        .map(|nic| NicRecord {
            mac: nic.mac.clone(),
            nic_tags_provided: Some(
                current
                    .get(nic.mac.as_str())
                    .map(|tags| tags.iter().cloned().collect())
                    .unwrap_or_default(),
            ),
        })
        .collect();

    MergeBatch { merged, skipped }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_merge_mode_parse_aliases() {
        assert_eq!("replace".parse::<MergeMode>().unwrap(), MergeMode::Replace);
        assert_eq!("update".parse::<MergeMode>().unwrap(), MergeMode::Union);
        assert_eq!("UNION".parse::<MergeMode>().unwrap(), MergeMode::Union);
        assert_eq!("delete".parse::<MergeMode>().unwrap(), MergeMode::Subtract);
        assert_eq!("subtract".parse::<MergeMode>().unwrap(), MergeMode::Subtract);
    }

    #[test]
    fn test_merge_mode_parse_unknown_is_validation_error() {
        let err = "frobnicate".parse::<MergeMode>().unwrap_err();
        assert!(matches!(
            err,
            ConvoyError::Validation(ValidationError::UnknownMergeMode { .. })
        ));
    }

    #[test]
    fn test_merge_mode_serde_aliases() {
        let mode: MergeMode = serde_json::from_str("\"delete\"").unwrap();
        assert_eq!(mode, MergeMode::Subtract);
        assert_eq!(serde_json::to_string(&MergeMode::Union).unwrap(), "\"union\"");
    }

    #[test]
    fn test_merge_union_scenario() {
        let merged = merge(
            &set(&["a", "b"]),
            &AttributeDelta::new(MergeMode::Union, ["b", "c"]),
        );
        assert_eq!(merged, set(&["a", "b", "c"]));
    }

    #[test]
    fn test_merge_subtract_scenario() {
        let merged = merge(
            &set(&["a", "b"]),
            &AttributeDelta::new(MergeMode::Subtract, ["b"]),
        );
        assert_eq!(merged, set(&["a"]));
    }

    #[test]
    fn test_merge_replace_ignores_existing() {
        let merged = merge(
            &set(&["a", "b"]),
            &AttributeDelta::new(MergeMode::Replace, ["z"]),
        );
        assert_eq!(merged, set(&["z"]));
    }

    #[test]
    fn test_merge_batch_skips_unknown_and_incomplete() {
        let existing = vec![
            NicRecord::new("m1", ["admin"]),
            NicRecord::new("m2", ["external"]),
        ];
        let deltas = vec![
            NicRecord::new("m1", ["internal"]),
            NicRecord::new("m9", ["internal"]),
            NicRecord {
                mac: "m2".to_string(),
                nic_tags_provided: None,
            },
        ];

        let batch = merge_batch(&existing, &deltas, MergeMode::Union);
        assert_eq!(batch.merged, vec![NicRecord::new("m1", ["admin", "internal"])]);
        assert_eq!(
            batch.skipped,
            vec![
                ("m9".to_string(), SkipReason::UnknownEntity),
                ("m2".to_string(), SkipReason::MissingAttributes),
            ]
        );
    }

    #[test]
    fn test_merge_batch_repeated_deltas_yield_one_record() {
        let existing = vec![NicRecord::new("m1", ["a", "b"])];
        let deltas = vec![NicRecord::new("m1", ["b"]), NicRecord::new("m1", ["a"])];

        let batch = merge_batch(&existing, &deltas, MergeMode::Subtract);
        assert_eq!(batch.merged.len(), 1);
        assert_eq!(batch.merged[0].nic_tags_provided, Some(vec![]));
    }

    #[test]
    fn test_merge_batch_existing_without_tags() {
        let existing = vec![NicRecord {
            mac: "m1".to_string(),
            nic_tags_provided: None,
        }];
        let deltas = vec![NicRecord::new("m1", ["admin"])];

        let batch = merge_batch(&existing, &deltas, MergeMode::Union);
        assert_eq!(batch.merged, vec![NicRecord::new("m1", ["admin"])]);

        let batch = merge_batch(&existing, &deltas, MergeMode::Subtract);
        assert_eq!(batch.merged[0].nic_tags_provided, Some(vec![]));
    }

    #[test]
    fn test_merge_batch_preserves_existing_order() {
        let existing = vec![
            NicRecord::new("m2", Vec::<String>::new()),
            NicRecord::new("m1", Vec::<String>::new()),
        ];
        let deltas = vec![NicRecord::new("m1", ["x"]), NicRecord::new("m2", ["y"])];

        let batch = merge_batch(&existing, &deltas, MergeMode::Replace);
        let macs: Vec<_> = batch.merged.iter().map(|n| n.mac.as_str()).collect();
        assert_eq!(macs, vec!["m2", "m1"]);
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
