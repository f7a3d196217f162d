//! Two-level failure classification
//!
//! Every failure that crosses a component boundary is an
//! `(ExitCode, ExitCause)` pair: the code names the category, the cause
//! narrows it. The pair travels on the wire at the head of every IPC
//! reply and is persisted with recorded errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure category.
///
/// `Ok` is a valid member: replies always carry an ExitCode, including
/// successful ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitCode {
    Ok,
    NeedRestart,
    NetworkError,
    InvalidToken,
    DataError,
    DbError,
    BackError,
    SystemError,
    FatalError,
    LogicError,
    TokenRefreshed,
    RateLimited,
    InvalidSync,
    InvalidOperation,
    OperationCanceled,
    UpdateRequired,
    LogUploadFailed,
}

impl ExitCode {
    /// `true` for codes describing a transient condition the process
    /// resolves on its own (reconnect, backoff). Such errors are recorded
    /// but not forwarded to telemetry.
    pub fn is_auto_resolved(self) -> bool {
        matches!(self, ExitCode::NetworkError | ExitCode::RateLimited)
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Narrowing of an [`ExitCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ExitCause {
    #[default]
    Unknown,
    WorkerExited,
    DbAccessError,
    DbEntryNotFound,
    LoginError,
    DriveMaintenance,
    DriveNotRenew,
    DriveAccessError,
    HttpErr,
    ApiErr,
    FileAccessError,
    SyncDirDoesntExist,
    SyncDirAccessError,
    SyncDirNestingError,
    UnableToCreateVfs,
    LiteSyncNotAllowed,
    NotEnoughDiskSpace,
    SocketsDefuncted,
    NotFound,
    QuotaExceeded,
    FullListParsingError,
    OperationCanceled,
}

impl std::fmt::Display for ExitCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The `(code, cause)` pair carried by replies and recorded errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    pub code: ExitCode,
    pub cause: ExitCause,
}

impl ExitInfo {
    pub const OK: ExitInfo = ExitInfo {
        code: ExitCode::Ok,
        cause: ExitCause::Unknown,
    };

    pub fn new(code: ExitCode, cause: ExitCause) -> Self {
        Self { code, cause }
    }

    pub fn is_ok(&self) -> bool {
        self.code == ExitCode::Ok
    }

    /// Merge two outcomes: the first failure wins, `Ok` otherwise.
    ///
    /// Used where an operation combines independent sub-results (for
    /// example adapter start + supervisor start) into one reply.
    pub fn merge(self, other: ExitInfo) -> ExitInfo {
        if !self.is_ok() {
            self
        } else {
            other
        }
    }
}

/// Result alias for operations whose failure is an [`ExitInfo`] pair.
pub type ExitResult<T = ()> = std::result::Result<T, ExitInfo>;

impl From<ExitCode> for ExitInfo {
    fn from(code: ExitCode) -> Self {
        Self {
            code,
            cause: ExitCause::Unknown,
        }
    }
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.code, self.cause)
    }
}

/// Errors produced by domain-level validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid local path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid remote node identifier
    #[error("Invalid node id: {0}")]
    InvalidNodeId(String),

    /// Invalid state transition attempt
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState {
        /// The current state
        from: String,
        /// The attempted target state
        to: String,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_first_failure() {
        let fail = ExitInfo::new(ExitCode::SystemError, ExitCause::UnableToCreateVfs);
        let ok = ExitInfo::OK;
        assert_eq!(ok.merge(fail), fail);
        assert_eq!(fail.merge(ok), fail);
        assert_eq!(ok.merge(ok), ok);

        let other = ExitInfo::new(ExitCode::DbError, ExitCause::DbAccessError);
        assert_eq!(fail.merge(other), fail);
    }

    #[test]
    fn test_auto_resolved_codes() {
        assert!(ExitCode::NetworkError.is_auto_resolved());
        assert!(ExitCode::RateLimited.is_auto_resolved());
        assert!(!ExitCode::DbError.is_auto_resolved());
        assert!(!ExitCode::InvalidSync.is_auto_resolved());
    }

    #[test]
    fn test_display() {
        let info = ExitInfo::new(ExitCode::InvalidSync, ExitCause::SyncDirNestingError);
        assert_eq!(info.to_string(), "InvalidSync/SyncDirNestingError");
    }

    #[test]
    fn test_serde_roundtrip() {
        let info = ExitInfo::new(ExitCode::SystemError, ExitCause::LiteSyncNotAllowed);
        let json = serde_json::to_string(&info).unwrap();
        let parsed: ExitInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(info, parsed);
    }
}
