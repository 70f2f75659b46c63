//! # Reconciler
//!
//! Diffs desired comments against the ones already on the pull request and
//! assigns each desired comment exactly one action.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::annotation::{DesiredAnnotation, ExistingAnnotation, Location};
use crate::marker::normalize_body;

/// How existing comments are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Marker matches are rewritten in place (or relocated)
    #[default]
    Override,
    /// Never touch existing comments; skip exact duplicates at the same spot
    Append,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Override => write!(f, "override"),
            Self::Append => write!(f, "append"),
        }
    }
}

/// Action assigned to one desired comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedAction {
    Create {
        desired: DesiredAnnotation,
    },
    Update {
        id: u64,
        desired: DesiredAnnotation,
    },
    /// Delete the stale comment, then create at the new location
    Relocate {
        stale_id: u64,
        desired: DesiredAnnotation,
    },
    SkipDuplicate {
        existing_id: u64,
        desired: DesiredAnnotation,
    },
}

impl PlannedAction {
    pub fn desired(&self) -> &DesiredAnnotation {
        match self {
            Self::Create { desired }
            | Self::Update { desired, .. }
            | Self::Relocate { desired, .. }
            | Self::SkipDuplicate { desired, .. } => desired,
        }
    }

    pub fn location(&self) -> &Location {
        &self.desired().location
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Relocate { .. } => "relocate",
            Self::SkipDuplicate { .. } => "skip_duplicate",
        }
    }

    /// Whether the action calls the remote store.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::SkipDuplicate { .. })
    }
}

/// Assign an action to every desired comment, preserving input order.
pub fn reconcile(
    desired: Vec<DesiredAnnotation>,
    existing: &[ExistingAnnotation],
    mode: SyncMode,
) -> Vec<PlannedAction> {
    match mode {
        SyncMode::Override => reconcile_override(desired, existing),
        SyncMode::Append => reconcile_append(desired, existing),
    }
}

fn reconcile_override(
    desired: Vec<DesiredAnnotation>,
    existing: &[ExistingAnnotation],
) -> Vec<PlannedAction> {
    let by_marker = index_by_marker(existing);
    // An existing comment backs at most one desired comment per run
    let mut claimed: HashSet<u64> = HashSet::new();

    desired
        .into_iter()
        .map(|desired| {
            let found = desired
                .marker
                .as_deref()
                .and_then(|marker| by_marker.get(marker));
            let matched = match found {
                Some(found) if !claimed.insert(found.id) => {
                    tracing::debug!(
                        location = %desired.location,
                        existing_id = found.id,
                        "Marker already matched earlier in this batch, creating"
                    );
                    None
                }
                other => other,
            };

            match matched {
                None => PlannedAction::Create { desired },
                Some(found) if found.location == desired.location => PlannedAction::Update {
                    id: found.id,
                    desired,
                },
                Some(found) => PlannedAction::Relocate {
                    stale_id: found.id,
                    desired,
                },
            }
        })
        .collect()
}

fn reconcile_append(
    desired: Vec<DesiredAnnotation>,
    existing: &[ExistingAnnotation],
) -> Vec<PlannedAction> {
    let mut seen: HashMap<(&Location, String), u64> = HashMap::new();
    for annotation in existing {
        seen.entry((&annotation.location, normalize_body(&annotation.body)))
            .or_insert(annotation.id);
    }

    desired
        .into_iter()
        .map(|desired| {
            let duplicate_of = seen
                .get(&(&desired.location, normalize_body(&desired.body)))
                .copied();
            match duplicate_of {
                Some(existing_id) => PlannedAction::SkipDuplicate {
                    existing_id,
                    desired,
                },
                None => PlannedAction::Create { desired },
            }
        })
        .collect()
}

/// First occurrence of each marker wins, by list order.
fn index_by_marker(existing: &[ExistingAnnotation]) -> HashMap<&str, &ExistingAnnotation> {
    let mut index = HashMap::new();
    let mut duplicates: HashSet<&str> = HashSet::new();
    for annotation in existing {
        if let Some(marker) = annotation.marker.as_deref() {
            if index.contains_key(marker) {
                duplicates.insert(marker);
            } else {
                index.insert(marker, annotation);
            }
        }
    }
    if !duplicates.is_empty() {
        tracing::debug!(
            markers = duplicates.len(),
            "Duplicate markers on remote, first occurrence used"
        );
    }
    index
}
