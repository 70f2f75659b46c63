//! # Identity Markers
//!
//! Every comment posted by the automation carries a hidden HTML comment of the
//! form `<!-- comment-sync:<key> -->`. The key survives force-pushes and line
//! shifts, so it is what correlates a desired comment with one that already
//! exists on the pull request.

use lazy_static::lazy_static;
use regex::Regex;

/// Opening sentinel of an identity marker.
pub const MARKER_START: &str = "<!-- comment-sync:";

/// Closing sentinel of an identity marker.
pub const MARKER_END: &str = "-->";

lazy_static! {
    static ref WHITESPACE_RUN: Regex = Regex::new(r"\s+").expect("static regex is valid");
}

/// Extract the identity marker from a comment body.
///
/// Only the first marker is considered when a body carries several. Returns
/// `None` for bodies without a marker, with an unterminated marker, or with an
/// empty key.
pub fn extract_marker(body: &str) -> Option<String> {
    let start = body.find(MARKER_START)? + MARKER_START.len();
    let rest = &body[start..];
    let end = rest.find(MARKER_END)?;
    let key = rest[..end].trim();
    if key.is_empty() {
        None
    } else {
        Some(key.to_string())
    }
}

/// Whether a body carries the marker sentinel at all.
///
/// This is the ownership signal used by retraction, so it deliberately
/// accepts malformed markers that [`extract_marker`] rejects.
pub fn has_marker_sentinel(body: &str) -> bool {
    body.contains(MARKER_START)
}

/// Render the marker for a key.
pub fn render_marker(key: &str) -> String {
    format!("{MARKER_START}{} {MARKER_END}", key.trim())
}

/// Append a marker for `key` unless the body already carries one.
pub fn embed_marker(body: &str, key: &str) -> String {
    if extract_marker(body).is_some() {
        return body.to_string();
    }
    let trimmed = body.trim_end();
    format!("{trimmed}\n\n{}", render_marker(key))
}

/// Collapse whitespace runs to a single space and trim.
pub fn normalize_body(body: &str) -> String {
    WHITESPACE_RUN.replace_all(body, " ").trim().to_string()
}
