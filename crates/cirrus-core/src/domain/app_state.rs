//! Process-level persisted key/value state

use serde::{Deserialize, Serialize};

/// Keys of the durable process-state table.
///
/// The set is closed: the presentation process reads and writes values but
/// may not invent new keys. Keys are initialized once at first run and only
/// ever overwritten afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppStateKey {
    /// Unix seconds of the last orchestrator self-restart; `0` = none
    /// recorded, `-1` = self-restart disabled by the previous session.
    LastServerSelfRestartDate,
    /// Unix seconds of the last presentation-process restart we initiated.
    LastClientSelfRestartDate,
    /// Current [`LogUploadState`] as a string.
    LogUploadState,
    /// Resumable token of an interrupted log upload.
    LogUploadToken,
    /// Progress percent of the running log upload.
    LogUploadPercent,
    /// Random identifier of this installation.
    AppUid,
}

impl AppStateKey {
    pub const ALL: [AppStateKey; 6] = [
        AppStateKey::LastServerSelfRestartDate,
        AppStateKey::LastClientSelfRestartDate,
        AppStateKey::LogUploadState,
        AppStateKey::LogUploadToken,
        AppStateKey::LogUploadPercent,
        AppStateKey::AppUid,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AppStateKey::LastServerSelfRestartDate => "last_server_self_restart_date",
            AppStateKey::LastClientSelfRestartDate => "last_client_self_restart_date",
            AppStateKey::LogUploadState => "log_upload_state",
            AppStateKey::LogUploadToken => "log_upload_token",
            AppStateKey::LogUploadPercent => "log_upload_percent",
            AppStateKey::AppUid => "app_uid",
        }
    }

    /// Value written when the key is first created.
    pub fn default_value(self) -> &'static str {
        match self {
            AppStateKey::LastServerSelfRestartDate => "0",
            AppStateKey::LastClientSelfRestartDate => "0",
            AppStateKey::LogUploadState => "none",
            AppStateKey::LogUploadToken => "",
            AppStateKey::LogUploadPercent => "0",
            AppStateKey::AppUid => "",
        }
    }
}

/// Sentinel stored in `LastServerSelfRestartDate` to disable the
/// self-restart watchdog for the next run.
pub const SELF_RESTART_DISABLED: i64 = -1;

/// Lifecycle of the support log upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LogUploadState {
    #[default]
    None,
    Archiving,
    Uploading,
    Success,
    Failed,
    CancelRequested,
    Canceled,
}

impl LogUploadState {
    pub fn as_str(self) -> &'static str {
        match self {
            LogUploadState::None => "none",
            LogUploadState::Archiving => "archiving",
            LogUploadState::Uploading => "uploading",
            LogUploadState::Success => "success",
            LogUploadState::Failed => "failed",
            LogUploadState::CancelRequested => "cancel_requested",
            LogUploadState::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(LogUploadState::None),
            "archiving" => Some(LogUploadState::Archiving),
            "uploading" => Some(LogUploadState::Uploading),
            "success" => Some(LogUploadState::Success),
            "failed" => Some(LogUploadState::Failed),
            "cancel_requested" => Some(LogUploadState::CancelRequested),
            "canceled" => Some(LogUploadState::Canceled),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_keys_have_distinct_names() {
        let mut names: Vec<&str> = AppStateKey::ALL.iter().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), AppStateKey::ALL.len());
    }

    #[test]
    fn test_log_upload_state_roundtrip() {
        for state in [
            LogUploadState::None,
            LogUploadState::Archiving,
            LogUploadState::Uploading,
            LogUploadState::Success,
            LogUploadState::Failed,
            LogUploadState::CancelRequested,
            LogUploadState::Canceled,
        ] {
            assert_eq!(LogUploadState::parse(state.as_str()), Some(state));
        }
    }
}
