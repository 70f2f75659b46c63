//! Comment data model shared by the post and clear flows.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::marker::extract_marker;

/// Which side of the diff a comment is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Left,
    #[default]
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Left => write!(f, "LEFT"),
            Self::Right => write!(f, "RIGHT"),
        }
    }
}

/// Position of a review comment in the pull request diff.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub path: String,
    pub line: u32,
    #[serde(default)]
    pub side: Side,
}

impl Location {
    pub fn new(path: impl Into<String>, line: u32, side: Side) -> Self {
        Self {
            path: path.into(),
            line,
            side,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.path, self.line, self.side)
    }
}

/// A comment the current run wants to exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DesiredAnnotation {
    pub location: Location,
    pub body: String,
    /// Identity marker derived from `body` at construction
    pub marker: Option<String>,
}

impl DesiredAnnotation {
    pub fn new(location: Location, body: impl Into<String>) -> Self {
        let body = body.into();
        let marker = extract_marker(&body);
        Self {
            location,
            body,
            marker,
        }
    }
}

/// A comment currently present on the pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExistingAnnotation {
    pub id: u64,
    pub location: Location,
    pub body: String,
    pub marker: Option<String>,
    pub author: String,
}

impl ExistingAnnotation {
    pub fn new(
        id: u64,
        location: Location,
        body: impl Into<String>,
        author: impl Into<String>,
    ) -> Self {
        let body = body.into();
        let marker = extract_marker(&body);
        Self {
            id,
            location,
            body,
            marker,
            author: author.into(),
        }
    }
}

/// Final status of one desired comment or one retraction target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Created,
    Updated,
    SkippedDuplicate,
    Deleted,
    Error,
}

/// Outcome record produced by exactly one dispatched task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationOutcome {
    pub status: OperationStatus,
    pub location: Location,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
}

impl OperationOutcome {
    pub fn success(
        status: OperationStatus,
        location: Location,
        remote_id: Option<u64>,
        attempts: u32,
    ) -> Self {
        Self {
            status,
            location,
            remote_id,
            error: None,
            attempts,
        }
    }

    pub fn failure(location: Location, error: impl fmt::Display, attempts: u32) -> Self {
        Self {
            status: OperationStatus::Error,
            location,
            remote_id: None,
            error: Some(error.to_string()),
            attempts,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == OperationStatus::Error
    }
}
