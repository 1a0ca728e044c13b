//! # Conflict Arbitration
//!
//! Pure decision rules for an incoming change that meets a record edited
//! locally since its last sync.
//!
//! ## Policy Table
//! ```text
//! ┌──────────────┬──────────────────────────────┬───────────────────────────┐
//! │ Policy       │ Decision                     │ Conflict row              │
//! ├──────────────┼──────────────────────────────┼───────────────────────────┤
//! │ source_wins  │ apply incoming               │ none (detection skipped)  │
//! │ target_wins  │ keep local                   │ resolved → target         │
//! │ newest_wins  │ newer timestamp wins         │ resolved → source|target  │
//! │ manual       │ hold, apply nothing          │ pending                   │
//! └──────────────┴──────────────────────────────┴───────────────────────────┘
//! ```
//!
//! `newest_wins` compares the record's source timestamp with the local
//! modification time; a tie goes to the source.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::types::{ConflictPolicy, ConflictResolution, ConflictScope, SourceData};

/// What the engine should do with an incoming change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictDecision {
    /// Overwrite local data with the incoming change.
    ApplySource,
    /// Keep local data, drop the incoming change.
    KeepTarget,
    /// Persist a pending conflict and wait for an operator.
    Defer,
}

impl ConflictDecision {
    /// The resolution recorded on the conflict row, `None` while pending.
    pub fn resolution(&self) -> Option<ConflictResolution> {
        match self {
            ConflictDecision::ApplySource => Some(ConflictResolution::Source),
            ConflictDecision::KeepTarget => Some(ConflictResolution::Target),
            ConflictDecision::Defer => None,
        }
    }
}

/// Decides a conflict under `policy`.
pub fn arbitrate(
    policy: ConflictPolicy,
    incoming_at: DateTime<Utc>,
    local_modified_at: DateTime<Utc>,
) -> ConflictDecision {
    match policy {
        ConflictPolicy::SourceWins => ConflictDecision::ApplySource,
        ConflictPolicy::TargetWins => ConflictDecision::KeepTarget,
        ConflictPolicy::NewestWins => {
            if incoming_at >= local_modified_at {
                ConflictDecision::ApplySource
            } else {
                ConflictDecision::KeepTarget
            }
        }
        ConflictPolicy::Manual => ConflictDecision::Defer,
    }
}

/// One field whose incoming value differs from the local value.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDiff {
    pub field: String,
    pub source_value: Value,
    pub target_value: Value,
}

/// Lists differing fields in key order. A field missing on one side
/// compares as `null`.
pub fn diff_fields(incoming: &SourceData, local: &SourceData) -> Vec<FieldDiff> {
    let mut keys: Vec<&String> = incoming.keys().chain(local.keys()).collect();
    keys.sort();
    keys.dedup();

    keys.into_iter()
        .filter_map(|key| {
            let source_value = incoming.get(key).cloned().unwrap_or(Value::Null);
            let target_value = local.get(key).cloned().unwrap_or(Value::Null);
            (source_value != target_value).then(|| FieldDiff {
                field: key.clone(),
                source_value,
                target_value,
            })
        })
        .collect()
}

/// The field description stored on a conflict row.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictFields {
    pub field: String,
    pub source_value: Value,
    pub target_value: Value,
}

/// Narrows a diff to what one conflict row records.
///
/// Returns `None` when nothing differs.
pub fn scope_conflict(diffs: &[FieldDiff], scope: ConflictScope) -> Option<ConflictFields> {
    let first = diffs.first()?;
    match scope {
        ConflictScope::FirstField => Some(ConflictFields {
            field: first.field.clone(),
            source_value: first.source_value.clone(),
            target_value: first.target_value.clone(),
        }),
        ConflictScope::AllFields => {
            let mut source = Map::new();
            let mut target = Map::new();
            for diff in diffs {
                source.insert(diff.field.clone(), diff.source_value.clone());
                target.insert(diff.field.clone(), diff.target_value.clone());
            }
            Some(ConflictFields {
                field: diffs
                    .iter()
                    .map(|d| d.field.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
                source_value: Value::Object(source),
                target_value: Value::Object(target),
            })
        }
    }
}
