//! # Retractor
//!
//! Runs the clear flow: authorize the requester, fetch every comment, keep
//! the ones owned by the automation, and delete them one at a time under the
//! retraction retry policy.
//!
//! The run moves strictly forward through [`RetractionState`]:
//! `pending -> running -> completed | failed`. Failed deletions are reported
//! as data; they never turn a completed run into a failed one.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::annotation::ExistingAnnotation;
use crate::authorize::AuthorizationGate;
use crate::error::SyncError;
use crate::marker::has_marker_sentinel;
use crate::report::RetractionReport;
use crate::retry::{Executor, RetryPolicy};
use crate::store::{AnnotationStore, DeleteOutcome, PermissionLookup};

/// Upper bound on owned comments deleted in one run.
pub const DEFAULT_MAX_OWNED: usize = 100;

/// Account that posts comments when no other is configured.
pub const DEFAULT_AUTOMATION_ACCOUNT: &str = "github-actions[bot]";

/// Lifecycle of one clear run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetractionState {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl RetractionState {
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Failed)
                | (Self::Running, Self::Completed | Self::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Move to `next`, refusing backward or sideways transitions.
    pub fn advance(&mut self, next: Self) -> Result<(), SyncError> {
        if !self.can_transition_to(next) {
            return Err(SyncError::Validation(format!(
                "invalid retraction transition {self:?} -> {next:?}"
            )));
        }
        debug!(from = ?self, to = ?next, "Retraction state change");
        *self = next;
        Ok(())
    }
}

/// Why a comment counts as automation-owned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Body carries the marker sentinel
    Marker,
    /// No marker, but written by a known automation account
    LegacyAuthor,
}

/// Classify ownership, checking the marker before the author.
pub fn ownership(
    annotation: &ExistingAnnotation,
    automation_accounts: &[String],
) -> Option<Ownership> {
    if has_marker_sentinel(&annotation.body) {
        Some(Ownership::Marker)
    } else if automation_accounts
        .iter()
        .any(|account| account.eq_ignore_ascii_case(&annotation.author))
    {
        Some(Ownership::LegacyAuthor)
    } else {
        None
    }
}

/// Tuning for the clear flow.
#[derive(Debug, Clone)]
pub struct RetractConfig {
    pub automation_accounts: Vec<String>,
    pub max_owned: usize,
}

impl Default for RetractConfig {
    fn default() -> Self {
        Self {
            automation_accounts: vec![DEFAULT_AUTOMATION_ACCOUNT.to_string()],
            max_owned: DEFAULT_MAX_OWNED,
        }
    }
}

/// A clear run that ended in the `failed` state.
#[derive(Debug, Error)]
#[error("retraction failed: {source}")]
pub struct RetractionFailure {
    /// Counts gathered before the failure
    pub report: RetractionReport,
    #[source]
    pub source: SyncError,
}

/// Deletes every automation-owned comment on the pull request.
pub struct Retractor {
    store: Arc<dyn AnnotationStore>,
    gate: AuthorizationGate,
    executor: Executor,
    config: RetractConfig,
}

impl Retractor {
    /// Create a retractor using the retraction retry policy.
    pub fn new(
        store: Arc<dyn AnnotationStore>,
        lookup: Arc<dyn PermissionLookup>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            gate: AuthorizationGate::new(lookup),
            executor: Executor::new(RetryPolicy::retraction(), cancel),
            config: RetractConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: RetractConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.executor = Executor::new(policy, self.executor.cancel_token().clone());
        self
    }

    /// Authorize `requester` and delete every owned comment.
    ///
    /// Returns an error only when authorization or the initial fetch fails;
    /// in both cases no delete has been attempted. The returned report
    /// carries the state the run ended in.
    #[instrument(skip(self))]
    pub async fn clear(&self, requester: &str) -> Result<RetractionReport, RetractionFailure> {
        let started = Instant::now();
        let mut report = RetractionReport::default();

        if let Err(err) = self.run(requester, &mut report).await {
            return Err(fail(report, started, err));
        }
        if let Err(err) = report.state.advance(RetractionState::Completed) {
            return Err(fail(report, started, err));
        }

        report.success = report.failed_count == 0;
        report.set_duration(started.elapsed());

        info!(
            found = report.found_count,
            deleted = report.deleted_count,
            failed = report.failed_count,
            "Retraction completed"
        );
        info!("{}", report.to_metrics_line());
        Ok(report)
    }

    async fn run(&self, requester: &str, report: &mut RetractionReport) -> Result<(), SyncError> {
        self.gate
            .authorize(requester, self.executor.cancel_token())
            .await?;
        report.state.advance(RetractionState::Running)?;

        let store = &self.store;
        let fetched = self.executor.execute("list", || store.list()).await;
        report.retry_attempts += fetched.retries();
        let existing = fetched.result?;

        let owned: Vec<&ExistingAnnotation> = existing
            .iter()
            .filter(|annotation| {
                ownership(annotation, &self.config.automation_accounts).is_some()
            })
            .collect();
        report.found_count = owned.len();
        info!(
            total = existing.len(),
            owned = owned.len(),
            "Found automation comments to retract"
        );

        if owned.len() > self.config.max_owned {
            warn!(
                owned = owned.len(),
                cap = self.config.max_owned,
                "Owned comments exceed cap, remaining comments left for a later run"
            );
        }

        for annotation in owned.iter().take(self.config.max_owned) {
            let id = annotation.id;
            let execution = self.executor.execute("delete", || store.delete(id)).await;
            report.retry_attempts += execution.retries();

            match execution.result {
                Ok(DeleteOutcome::Deleted) => {
                    debug!(id, "Deleted comment");
                    report.deleted_count += 1;
                }
                Ok(DeleteOutcome::NotFound) => {
                    debug!(id, "Comment already gone");
                    report.deleted_count += 1;
                }
                Err(err) if err.is_not_found() => {
                    debug!(id, "Comment already gone");
                    report.deleted_count += 1;
                }
                Err(err) => {
                    warn!(id, error = %err, "Failed to delete comment");
                    report.failed_count += 1;
                    report.errors.push(format!("comment {id}: {err}"));
                }
            }
        }
        Ok(())
    }
}

/// End a run that never reached `completed`; `failed` is reachable from
/// every non-terminal state.
fn fail(mut report: RetractionReport, started: Instant, source: SyncError) -> RetractionFailure {
    debug_assert!(report.state.can_transition_to(RetractionState::Failed));
    report.state = RetractionState::Failed;
    report.success = false;
    report.errors.push(source.to_string());
    report.set_duration(started.elapsed());

    warn!(error = %source, "Retraction failed");
    info!("{}", report.to_metrics_line());
    RetractionFailure { report, source }
}
