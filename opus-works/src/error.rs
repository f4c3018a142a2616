//! Error types and track-level issue annotations
//!
//! Lookup and data problems never abort a release. They are recorded as
//! [`TrackIssue`]s on the affected track and emitted with its annotations.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type for opus-works operations
pub type Result<T> = std::result::Result<T, WorksError>;

/// Errors from the work lookup boundary
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Authentication failed")]
    Unauthorized,

    #[error("Work not found: {0}")]
    NotFound(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Malformed relation data: {0}")]
    Malformed(String),
}

impl LookupError {
    /// Authentication failures switch to the anonymous request variant
    pub fn is_auth(&self) -> bool {
        matches!(self, LookupError::Unauthorized)
    }

    /// Malformed responses are data errors and are never retried
    pub fn is_retryable(&self) -> bool {
        !matches!(self, LookupError::Malformed(_))
    }
}

/// Errors surfaced to callers of the library and the CLI
#[derive(Debug, Error)]
pub enum WorksError {
    #[error(transparent)]
    Common(#[from] opus_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP client error: {0}")]
    Http(String),
}

/// Category of a track-level issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Transport failure during ancestor resolution (after retries)
    LookupFailure,
    /// Lookup response lacked the expected relation structure
    MalformedRelationData,
    /// A configuration entry was rejected
    Configuration,
    /// Non-fatal: no confident result, a fallback was used
    Ambiguity,
    /// Inconsistent catalog data such as a cyclic hierarchy
    DataInconsistency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// An issue attached to a single track
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TrackIssue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub message: String,
}

impl TrackIssue {
    pub fn error(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn warning(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for TrackIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Ordered, de-duplicated issue list for one track
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IssueLog(Vec<TrackIssue>);

impl IssueLog {
    pub fn push(&mut self, issue: TrackIssue) {
        if !self.0.contains(&issue) {
            self.0.push(issue);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackIssue> {
        self.0.iter()
    }

    pub fn errors(&self) -> impl Iterator<Item = &TrackIssue> {
        self.0.iter().filter(|i| i.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &TrackIssue> {
        self.0.iter().filter(|i| !i.is_error())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(LookupError::Network("reset".into()).is_retryable());
        assert!(LookupError::Unauthorized.is_retryable());
        assert!(LookupError::Unauthorized.is_auth());
        assert!(!LookupError::Malformed("no id".into()).is_retryable());
    }

    #[test]
    fn test_issue_log_deduplicates() {
        let mut log = IssueLog::default();
        log.push(TrackIssue::error(IssueKind::LookupFailure, "lost"));
        log.push(TrackIssue::error(IssueKind::LookupFailure, "lost"));
        log.push(TrackIssue::warning(IssueKind::Ambiguity, "unsure"));
        assert_eq!(log.errors().count(), 1);
        assert_eq!(log.warnings().count(), 1);
    }
}
