//! Recorded error entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{ExitCause, ExitCode};

/// Scope of a recorded error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorLevel {
    /// Process-wide, not tied to a sync.
    Server,
    /// Tied to one sync.
    Sync,
    /// Tied to one node within a sync.
    Node,
}

impl ErrorLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorLevel::Server => "server",
            ErrorLevel::Sync => "sync",
            ErrorLevel::Node => "node",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "server" => Some(ErrorLevel::Server),
            "sync" => Some(ErrorLevel::Sync),
            "node" => Some(ErrorLevel::Node),
            _ => None,
        }
    }
}

/// A timestamped failure record.
///
/// Records are deduplicated on their identity fields: a newly observed
/// error similar to an existing row refreshes that row's timestamp instead
/// of inserting a duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// 0 until persisted.
    pub db_id: i64,
    pub time: DateTime<Utc>,
    pub level: ErrorLevel,
    /// Name of the operation that observed the failure.
    pub function_name: String,
    /// 0 for server-level errors.
    pub sync_db_id: i64,
    pub exit_code: ExitCode,
    pub exit_cause: ExitCause,
    /// Local path involved, when any.
    pub local_path: Option<String>,
    /// Remote node involved, when any.
    pub node_id: Option<String>,
    pub message: String,
}

impl ErrorRecord {
    /// Server-level record with no sync attached.
    pub fn server(function_name: &str, exit_code: ExitCode, exit_cause: ExitCause) -> Self {
        Self {
            db_id: 0,
            time: Utc::now(),
            level: ErrorLevel::Server,
            function_name: function_name.to_string(),
            sync_db_id: 0,
            exit_code,
            exit_cause,
            local_path: None,
            node_id: None,
            message: String::new(),
        }
    }

    /// Record attached to one sync.
    pub fn sync(
        sync_db_id: i64,
        function_name: &str,
        exit_code: ExitCode,
        exit_cause: ExitCause,
    ) -> Self {
        Self {
            db_id: 0,
            time: Utc::now(),
            level: ErrorLevel::Sync,
            function_name: function_name.to_string(),
            sync_db_id,
            exit_code,
            exit_cause,
            local_path: None,
            node_id: None,
            message: String::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.local_path = Some(path.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Identity comparison for deduplication. Time, db id and message are
    /// not part of the identity.
    pub fn is_similar_to(&self, other: &ErrorRecord) -> bool {
        self.level == other.level
            && self.sync_db_id == other.sync_db_id
            && self.function_name == other.function_name
            && self.exit_code == other.exit_code
            && self.exit_cause == other.exit_cause
            && self.local_path == other.local_path
    }

    /// `true` for records the process resolves on its own; those are shown
    /// differently by the presentation layer and never reach telemetry.
    pub fn is_auto_resolved(&self) -> bool {
        self.exit_code.is_auto_resolved()
    }
}
