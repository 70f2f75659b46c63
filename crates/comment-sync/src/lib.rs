//! Review comment reconciliation for pull requests.
//!
//! This crate keeps the automation's review comments on a pull request in
//! line with what the current run wants to say, and can retract all of them
//! on request.
//!
//! # Flows
//!
//! - **post**: [`Dispatcher::post`] fetches the existing comments, matches them
//!   to desired ones by identity marker ([`marker`]), and creates, updates, or
//!   relocates comments concurrently, at most five remote mutations at a time.
//! - **clear**: [`Retractor::clear`] checks the requester's permission, then
//!   deletes every automation-owned comment one by one.
//!
//! Both flows go through [`Executor`], which retries throttled calls under
//! one of two policies ([`RetryPolicy::posting`] and
//! [`RetryPolicy::retraction`]) and honours a shared cancellation token.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use comment_sync::{Dispatcher, GitHubClient, JsonFileSource, AnnotationSource, SyncMode};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> comment_sync::Result<()> {
//! let client = GitHubClient::new("https://api.github.com", "token", "5dlabs", "cto", 42)?
//!     .with_commit("0123abcd");
//! let desired = JsonFileSource::new("comments.json").desired()?;
//!
//! let dispatcher = Dispatcher::new(Arc::new(client), CancellationToken::new());
//! let report = dispatcher.post(desired, SyncMode::Override).await?;
//! println!("posted {} comments", report.posted_count);
//! # Ok(())
//! # }
//! ```

pub mod annotation;
pub mod authorize;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod github;
pub mod marker;
pub mod reconcile;
pub mod report;
pub mod retract;
pub mod retry;
pub mod store;

pub use annotation::{
    DesiredAnnotation, ExistingAnnotation, Location, OperationOutcome, OperationStatus, Side,
};
pub use authorize::AuthorizationGate;
pub use config::Config;
pub use dispatch::{DispatchConfig, Dispatcher};
pub use error::{Result, SyncError};
pub use github::GitHubClient;
pub use reconcile::{reconcile, PlannedAction, SyncMode};
pub use report::{RetractionReport, SyncReport};
pub use retract::{RetractConfig, RetractionFailure, RetractionState, Retractor};
pub use retry::{Executor, RetryPolicy};
pub use store::{
    AnnotationSource, AnnotationStore, DeleteOutcome, JsonFileSource, PermissionLevel,
    PermissionLookup,
};
