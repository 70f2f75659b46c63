//! Collaborator contracts: the remote comment store, the permission lookup,
//! and the source of desired comments.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

use crate::annotation::{DesiredAnnotation, ExistingAnnotation, Location, Side};
use crate::error::{Result, SyncError};
use crate::marker::{embed_marker, extract_marker};

/// Result of a delete call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Already gone, e.g. removed by a concurrent retraction
    NotFound,
}

/// Remote store holding the review comments of one pull request.
#[async_trait]
pub trait AnnotationStore: Send + Sync {
    /// Fetch every comment on the pull request, following pagination.
    async fn list(&self) -> Result<Vec<ExistingAnnotation>>;

    /// Create a comment and return its remote id.
    async fn create(&self, annotation: &DesiredAnnotation) -> Result<u64>;

    /// Replace the body of an existing comment.
    async fn update(&self, id: u64, body: &str) -> Result<u64>;

    async fn delete(&self, id: u64) -> Result<DeleteOutcome>;

    /// Remaining request quota.
    async fn check_quota(&self) -> Result<u64>;
}

/// Repository permission level of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Admin,
    Maintain,
    Write,
    Triage,
    Read,
    None,
}

impl PermissionLevel {
    /// Whether this level may retract automation comments.
    pub fn can_retract(self) -> bool {
        matches!(self, Self::Admin | Self::Maintain | Self::Write)
    }

    /// Parse a level reported by the remote; unknown values map to `None`.
    pub fn from_remote(raw: &str) -> Self {
        raw.parse().unwrap_or(Self::None)
    }
}

impl FromStr for PermissionLevel {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "maintain" => Ok(Self::Maintain),
            "write" => Ok(Self::Write),
            "triage" => Ok(Self::Triage),
            "read" => Ok(Self::Read),
            "none" => Ok(Self::None),
            other => Err(SyncError::Validation(format!(
                "unknown permission level '{other}'"
            ))),
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Admin => "admin",
            Self::Maintain => "maintain",
            Self::Write => "write",
            Self::Triage => "triage",
            Self::Read => "read",
            Self::None => "none",
        };
        f.write_str(name)
    }
}

/// Lookup of a user's permission on the repository.
#[async_trait]
pub trait PermissionLookup: Send + Sync {
    async fn permission_level(&self, user: &str) -> Result<PermissionLevel>;
}

/// Producer of the comments a run wants to exist, in order.
pub trait AnnotationSource {
    fn desired(&self) -> Result<Vec<DesiredAnnotation>>;
}

/// One entry of the JSON input file.
#[derive(Debug, Deserialize)]
struct RawDesired {
    path: String,
    line: u32,
    #[serde(default)]
    side: Side,
    body: String,
    /// Marker key to embed when the body has none
    #[serde(default)]
    key: Option<String>,
}

/// Reads desired comments from a JSON array on disk.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse and validate a JSON document.
    pub fn parse(json: &str) -> Result<Vec<DesiredAnnotation>> {
        let raw: Vec<RawDesired> = serde_json::from_str(json)?;
        raw.into_iter()
            .enumerate()
            .map(|(index, entry)| {
                if entry.path.trim().is_empty() {
                    return Err(SyncError::Validation(format!("entry {index}: empty path")));
                }
                if entry.line == 0 {
                    return Err(SyncError::Validation(format!(
                        "entry {index}: line numbers start at 1"
                    )));
                }
                if entry.body.trim().is_empty() {
                    return Err(SyncError::Validation(format!("entry {index}: empty body")));
                }
                let body = match entry.key.as_deref().map(str::trim) {
                    Some(key) if !key.is_empty() && extract_marker(&entry.body).is_none() => {
                        embed_marker(&entry.body, key)
                    }
                    _ => entry.body,
                };
                Ok(DesiredAnnotation::new(
                    Location::new(entry.path, entry.line, entry.side),
                    body,
                ))
            })
            .collect()
    }
}

impl AnnotationSource for JsonFileSource {
    fn desired(&self) -> Result<Vec<DesiredAnnotation>> {
        let contents = std::fs::read_to_string(&self.path).map_err(|e| {
            SyncError::Validation(format!("cannot read {}: {e}", self.path.display()))
        })?;
        let desired = Self::parse(&contents)?;
        debug!(path = %self.path.display(), count = desired.len(), "Loaded desired comments");
        Ok(desired)
    }
}
