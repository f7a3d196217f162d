//! Sync entity and virtual-file mode

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::node_set::NodeId;

/// How remote content is materialized under the sync's local path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum VfsMode {
    /// Everything fully hydrated on disk, no placeholders.
    #[default]
    Off,
    /// System cloud-files provider (Windows-style).
    CloudFiles,
    /// System file-provider extension (macOS-style).
    FileProvider,
    /// Portable placeholder files carrying a reserved suffix.
    Suffix,
}

impl VfsMode {
    pub fn is_virtual(self) -> bool {
        self != VfsMode::Off
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VfsMode::Off => "off",
            VfsMode::CloudFiles => "cloud_files",
            VfsMode::FileProvider => "file_provider",
            VfsMode::Suffix => "suffix",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(VfsMode::Off),
            "cloud_files" => Some(VfsMode::CloudFiles),
            "file_provider" => Some(VfsMode::FileProvider),
            "suffix" => Some(VfsMode::Suffix),
            _ => None,
        }
    }
}

impl std::fmt::Display for VfsMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One local-folder-to-remote-folder binding, the unit of orchestration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sync {
    pub db_id: i64,
    pub drive_db_id: i64,
    /// Absolute path of the local folder.
    pub local_path: PathBuf,
    /// Path of the bound folder on the remote drive.
    pub target_path: String,
    /// Remote node id of the bound folder.
    pub target_node_id: Option<NodeId>,
    pub supports_virtual_files: bool,
    pub virtual_file_mode: VfsMode,
    /// Platform navigation-pane handle (sidebar shortcut id), when set.
    pub navigation_pane_handle: Option<String>,
    pub paused: bool,
}

impl Sync {
    /// `true` when `self.local_path` contains or is contained in `other`'s
    /// local path. Nested syncs are invalid: the inner one would be
    /// reconciled twice.
    pub fn overlaps(&self, other: &Sync) -> bool {
        is_sub_dir(&self.local_path, &other.local_path)
            || is_sub_dir(&other.local_path, &self.local_path)
    }
}

/// `true` when `path` equals or lives under `base`.
pub fn is_sub_dir(path: &Path, base: &Path) -> bool {
    path.starts_with(base)
}

/// Externally observable state of a sync's supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SyncStatus {
    #[default]
    Undefined,
    Starting,
    Idle,
    Running,
    Paused,
    Stopped,
    Error,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncStatus::Undefined => "undefined",
            SyncStatus::Starting => "starting",
            SyncStatus::Idle => "idle",
            SyncStatus::Running => "running",
            SyncStatus::Paused => "paused",
            SyncStatus::Stopped => "stopped",
            SyncStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}
