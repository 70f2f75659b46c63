//! # Authorization Gate
//!
//! Checks that a requester may retract automation comments before anything
//! is deleted.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::error::{Result, SyncError};
use crate::store::{PermissionLevel, PermissionLookup};

/// Gate in front of the clear flow.
pub struct AuthorizationGate {
    lookup: Arc<dyn PermissionLookup>,
}

impl AuthorizationGate {
    pub fn new(lookup: Arc<dyn PermissionLookup>) -> Self {
        Self { lookup }
    }

    /// Resolve the requester's level and reject anything below `write`.
    ///
    /// Lookup failures propagate unchanged; they never count as a grant.
    #[instrument(skip(self, cancel))]
    pub async fn authorize(
        &self,
        requester: &str,
        cancel: &CancellationToken,
    ) -> Result<PermissionLevel> {
        let requester = requester.trim();
        if requester.is_empty() {
            return Err(SyncError::Validation("requester must not be empty".to_string()));
        }

        let level = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SyncError::Cancelled),
            level = self.lookup.permission_level(requester) => level?,
        };

        if level.can_retract() {
            info!(requester, %level, "Requester authorized");
            Ok(level)
        } else {
            warn!(requester, %level, "Requester lacks permission to retract comments");
            Err(SyncError::Authorization(format!(
                "{requester} has '{level}' permission; write, maintain, or admin is required"
            )))
        }
    }
}
