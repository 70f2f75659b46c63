//! # Dispatcher
//!
//! Runs the post flow: fetch existing comments, reconcile, then apply every
//! planned action on its own task. A counting semaphore caps how many remote
//! mutations are in flight at once, however large the batch.

use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::annotation::{
    DesiredAnnotation, ExistingAnnotation, Location, OperationOutcome, OperationStatus,
};
use crate::error::{Result, SyncError};
use crate::reconcile::{reconcile, PlannedAction, SyncMode};
use crate::report::SyncReport;
use crate::retry::{Executor, RetryPolicy};
use crate::store::AnnotationStore;

/// Default cap on concurrent remote mutations.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 5;

/// Tuning for the post flow.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub max_in_flight: usize,
    /// Batches at least this large get progress notifications
    pub progress_threshold: usize,
    /// Completed items between progress notifications
    pub progress_interval: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            progress_threshold: 20,
            progress_interval: 10,
        }
    }
}

/// Applies reconciled actions against the remote store.
pub struct Dispatcher {
    store: Arc<dyn AnnotationStore>,
    executor: Executor,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Create a dispatcher using the posting retry policy.
    pub fn new(store: Arc<dyn AnnotationStore>, cancel: CancellationToken) -> Self {
        Self {
            store,
            executor: Executor::new(RetryPolicy::posting(), cancel),
            config: DispatchConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Reconcile `desired` against the pull request and apply the result.
    ///
    /// Fails only for malformed input or when the existing comments cannot be
    /// fetched; per-item failures are recorded in the report.
    #[instrument(skip_all, fields(mode = %mode, desired = desired.len()))]
    pub async fn post(
        &self,
        desired: Vec<DesiredAnnotation>,
        mode: SyncMode,
    ) -> Result<SyncReport> {
        validate(&desired, &self.config)?;

        let quota = self.check_quota().await;
        let existing = self.fetch_existing().await?;

        let plan = reconcile(desired, &existing, mode);
        let relocated = plan
            .iter()
            .filter(|action| matches!(action, PlannedAction::Relocate { .. }))
            .count();
        let mutations = plan.iter().filter(|action| action.is_mutation()).count();
        info!(
            existing = existing.len(),
            planned = plan.len(),
            mutations,
            relocated,
            "Reconciled comments"
        );

        if let Some(remaining) = quota {
            if (remaining as usize) < mutations {
                warn!(remaining, mutations, "Remaining quota is below planned mutations");
            }
        }

        let outcomes = self.run(plan).await;
        let report = SyncReport::from_outcomes(outcomes)
            .with_relocated(relocated)
            .with_quota(quota);

        info!(
            posted = report.posted_count,
            skipped = report.skipped_duplicate_count,
            errors = report.error_count,
            "Post flow finished"
        );
        Ok(report)
    }

    /// Apply a plan with one task per action and wait for all of them.
    pub async fn run(&self, plan: Vec<PlannedAction>) -> Vec<OperationOutcome> {
        let total = plan.len();
        let semaphore = Arc::new(Semaphore::new(self.config.max_in_flight));

        let mut pending: FuturesUnordered<_> = plan
            .into_iter()
            .map(|action| {
                let location = action.location().clone();
                let task = tokio::spawn(apply(
                    action,
                    Arc::clone(&self.store),
                    self.executor.clone(),
                    Arc::clone(&semaphore),
                ));
                async move { (location, task.await) }
            })
            .collect();

        let report_progress = total >= self.config.progress_threshold;
        let interval = self.config.progress_interval.max(1);
        let mut outcomes = Vec::with_capacity(total);

        while let Some((location, joined)) = pending.next().await {
            let outcome = joined.unwrap_or_else(|err| {
                OperationOutcome::failure(location, format!("task failed: {err}"), 0)
            });
            outcomes.push(outcome);

            let completed = outcomes.len();
            if report_progress && completed % interval == 0 && completed < total {
                let errors = outcomes.iter().filter(|o| o.is_error()).count();
                info!(completed, total, errors, "Comment progress");
            }
        }

        if report_progress {
            let errors = outcomes.iter().filter(|o| o.is_error()).count();
            info!(completed = outcomes.len(), total, errors, "All comments processed");
        }

        outcomes
    }

    async fn check_quota(&self) -> Option<u64> {
        let cancel = self.executor.cancel_token();
        let checked = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(SyncError::Cancelled),
            checked = self.store.check_quota() => checked,
        };
        match checked {
            Ok(remaining) => {
                debug!(remaining, "Remote quota");
                Some(remaining)
            }
            Err(err) => {
                warn!(error = %err, "Quota check failed, continuing");
                None
            }
        }
    }

    async fn fetch_existing(&self) -> Result<Vec<ExistingAnnotation>> {
        let store = &self.store;
        let execution = self.executor.execute("list", || store.list()).await;
        execution.result.map_err(|err| {
            warn!(error = %err, "Failed to fetch existing comments");
            err
        })
    }
}

fn validate(desired: &[DesiredAnnotation], config: &DispatchConfig) -> Result<()> {
    if config.max_in_flight == 0 {
        return Err(SyncError::Validation(
            "max_in_flight must be at least 1".to_string(),
        ));
    }
    for (index, annotation) in desired.iter().enumerate() {
        if annotation.location.path.trim().is_empty() || annotation.location.line == 0 {
            return Err(SyncError::Validation(format!(
                "comment {index} has an invalid location: {}",
                annotation.location
            )));
        }
    }
    Ok(())
}

async fn apply(
    action: PlannedAction,
    store: Arc<dyn AnnotationStore>,
    executor: Executor,
    semaphore: Arc<Semaphore>,
) -> OperationOutcome {
    let location = action.location().clone();

    let _permit = if action.is_mutation() {
        match acquire(semaphore, executor.cancel_token()).await {
            Ok(permit) => Some(permit),
            Err(err) => return OperationOutcome::failure(location, err, 0),
        }
    } else {
        None
    };

    match action {
        PlannedAction::SkipDuplicate { existing_id, .. } => OperationOutcome::success(
            OperationStatus::SkippedDuplicate,
            location,
            Some(existing_id),
            0,
        ),
        PlannedAction::Create { desired } => {
            let execution = executor.execute("create", || store.create(&desired)).await;
            finish(OperationStatus::Created, location, execution.attempts, execution.result)
        }
        PlannedAction::Update { id, desired } => {
            let execution = executor
                .execute("update", || store.update(id, &desired.body))
                .await;
            finish(OperationStatus::Updated, location, execution.attempts, execution.result)
        }
        PlannedAction::Relocate { stale_id, desired } => {
            let removed = executor.execute("delete_stale", || store.delete(stale_id)).await;
            if let Err(err) = &removed.result {
                warn!(
                    stale_id,
                    error = %err,
                    "Failed to delete relocated comment, creating anyway"
                );
            }
            let execution = executor.execute("create", || store.create(&desired)).await;
            finish(
                OperationStatus::Created,
                location,
                removed.attempts + execution.attempts,
                execution.result,
            )
        }
    }
}

async fn acquire(
    semaphore: Arc<Semaphore>,
    cancel: &CancellationToken,
) -> Result<OwnedSemaphorePermit> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(SyncError::Cancelled),
        permit = semaphore.acquire_owned() => permit.map_err(|_| SyncError::Cancelled),
    }
}

fn finish(
    status: OperationStatus,
    location: Location,
    attempts: u32,
    result: Result<u64>,
) -> OperationOutcome {
    match result {
        Ok(id) => {
            debug!(%location, id, ?status, "Comment applied");
            OperationOutcome::success(status, location, Some(id), attempts)
        }
        Err(err) => {
            warn!(%location, attempts, error = %err, "Comment failed");
            OperationOutcome::failure(location, err, attempts)
        }
    }
}
