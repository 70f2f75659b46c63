//! # Result Aggregation
//!
//! Turns per-item outcomes into the summaries handed back to callers.

use serde::Serialize;
use std::time::Duration;

use crate::annotation::{OperationOutcome, OperationStatus};
use crate::retract::RetractionState;

/// Prefix of the single-line metrics record emitted after a retraction.
pub const METRICS_PREFIX: &str = "COMMENT_SYNC_METRICS";

/// Summary of a post run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Created plus updated
    pub posted_count: usize,
    pub created_count: usize,
    pub updated_count: usize,
    /// Relocations, already included in `created_count`
    pub relocated_count: usize,
    pub skipped_duplicate_count: usize,
    pub error_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota_remaining: Option<u64>,
    pub results: Vec<OperationOutcome>,
}

impl SyncReport {
    /// Aggregate completed outcomes; ordering of `outcomes` does not matter.
    pub fn from_outcomes(outcomes: Vec<OperationOutcome>) -> Self {
        let mut report = Self::default();
        for outcome in &outcomes {
            match outcome.status {
                OperationStatus::Created => report.created_count += 1,
                OperationStatus::Updated => report.updated_count += 1,
                OperationStatus::SkippedDuplicate => report.skipped_duplicate_count += 1,
                OperationStatus::Error => report.error_count += 1,
                // Post runs never delete as an outcome
                OperationStatus::Deleted => {}
            }
        }
        report.posted_count = report.created_count + report.updated_count;
        report.results = outcomes;
        report
    }

    #[must_use]
    pub fn with_relocated(mut self, relocated: usize) -> Self {
        self.relocated_count = relocated;
        self
    }

    #[must_use]
    pub fn with_quota(mut self, quota: Option<u64>) -> Self {
        self.quota_remaining = quota;
        self
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// Human-readable error strings, one per failed item.
    pub fn errors(&self) -> Vec<String> {
        self.results
            .iter()
            .filter_map(|outcome| {
                outcome
                    .error
                    .as_ref()
                    .map(|err| format!("{}: {err}", outcome.location))
            })
            .collect()
    }
}

/// Summary of a clear run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetractionReport {
    /// Lifecycle state the run ended in
    pub state: RetractionState,
    pub found_count: usize,
    pub deleted_count: usize,
    pub failed_count: usize,
    pub duration_seconds: f64,
    pub retry_attempts: u32,
    pub success: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl RetractionReport {
    pub fn set_duration(&mut self, elapsed: Duration) {
        self.duration_seconds = (elapsed.as_secs_f64() * 1000.0).round() / 1000.0;
    }

    /// Flat one-line record for log scrapers.
    pub fn to_metrics_line(&self) -> String {
        let record = serde_json::json!({
            "event": "retraction",
            "state": self.state,
            "found": self.found_count,
            "deleted": self.deleted_count,
            "failed": self.failed_count,
            "duration_seconds": self.duration_seconds,
            "retry_attempts": self.retry_attempts,
            "success": self.success,
        });
        format!("{METRICS_PREFIX} {record}")
    }
}
