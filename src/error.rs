//! Unified error handling for scribed.
//!
//! Session event errors carry a static code used both for log labeling and
//! for the `error` event sent back to the offending client. Lock conflicts
//! and missing entities are deliberately *not* errors — they are first-class
//! result values (see `locks::AcquireOutcome` and the `Option`-returning
//! store operations).

use crate::protocol::ServerEvent;
use thiserror::Error;

/// Errors that can occur while handling a client session event.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid range: [{start}, {end})")]
    InvalidRange { start: usize, end: usize },

    #[error("branch name must not be empty")]
    EmptyBranchName,

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("not joined to a project")]
    NotJoined,

    #[error("no such project: {0}")]
    NoSuchProject(String),

    #[error("no such lock: {0}")]
    NoSuchLock(String),

    #[error("no such comment: {0}")]
    NoSuchComment(String),

    #[error("permission denied")]
    PermissionDenied,

    #[error("malformed event: {0}")]
    Malformed(String),
}

impl SessionError {
    /// Get a static error code string for log labeling and wire replies.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRange { .. } => "invalid_range",
            Self::EmptyBranchName => "empty_branch_name",
            Self::MissingField(_) => "missing_field",
            Self::NotJoined => "not_joined",
            Self::NoSuchProject(_) => "no_such_project",
            Self::NoSuchLock(_) => "no_such_lock",
            Self::NoSuchComment(_) => "no_such_comment",
            Self::PermissionDenied => "permission_denied",
            Self::Malformed(_) => "malformed_event",
        }
    }

    /// Convert to an `error` event for the offending client.
    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::Error {
            code: self.error_code().to_string(),
            message: self.to_string(),
        }
    }
}

/// Result type for session event handlers.
pub type SessionResult = Result<(), SessionError>;
