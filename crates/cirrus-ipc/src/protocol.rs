//! Request and signal enumerations
//!
//! Both enumerations are closed: the opcode tables below are the wire
//! contract, and a frame carrying any other number is answered with
//! `InvalidOperation` rather than dispatched. Opcodes are grouped by
//! entity (users 1x, drives 2x, syncs 3x, node sets 4x, parameters 5x,
//! errors 6x, log upload 7x, updater 8x, utility 9x).

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use cirrus_core::domain::{NodeId, NodeSetKind};
use cirrus_core::ExitInfo;

use crate::IpcError;

/// A request from the presentation process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    UserList,
    UserDelete {
        user_db_id: i64,
    },
    AccountList {
        user_db_id: i64,
    },
    DriveList,
    DriveDelete {
        drive_db_id: i64,
    },
    SyncList,
    SyncStart {
        sync_db_id: i64,
    },
    SyncStop {
        sync_db_id: i64,
    },
    SyncStatus {
        sync_db_id: i64,
    },
    SyncAdd {
        drive_db_id: i64,
        local_path: PathBuf,
        target_path: String,
        target_node_id: Option<NodeId>,
        black_list: HashSet<NodeId>,
        white_list: HashSet<NodeId>,
    },
    SyncDelete {
        sync_db_id: i64,
    },
    SyncSetSupportsVirtualFiles {
        sync_db_id: i64,
        value: bool,
    },
    NodeSetGet {
        sync_db_id: i64,
        kind: NodeSetKind,
    },
    NodeSetSet {
        sync_db_id: i64,
        kind: NodeSetKind,
        nodes: HashSet<NodeId>,
    },
    NodeSubfolders {
        sync_db_id: i64,
        node_id: NodeId,
    },
    NodeFolderSize {
        sync_db_id: i64,
        node_id: NodeId,
    },
    ParameterGet {
        name: String,
    },
    ParameterSet {
        name: String,
        value: String,
    },
    AppStateGet {
        key: String,
    },
    AppStateSet {
        key: String,
        value: String,
    },
    ErrorList {
        sync_db_id: i64,
    },
    ErrorsClear {
        sync_db_id: i64,
        auto_resolved_only: bool,
    },
    LogUpload,
    LogUploadCancel,
    UpdaterChangeChannel {
        channel: String,
    },
    Quit,
}

/// An out-of-band event pushed to every connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Signal {
    UserAdded { user_db_id: i64 },
    UserUpdated { user_db_id: i64 },
    UserRemoved { user_db_id: i64 },
    UserStatusChanged { user_db_id: i64, connected: bool },
    AccountAdded { account_db_id: i64 },
    AccountRemoved { account_db_id: i64 },
    DriveAdded { drive_db_id: i64 },
    DriveRemoved { drive_db_id: i64 },
    DriveDeletionFailed { drive_db_id: i64 },
    SyncAdded { sync_db_id: i64 },
    SyncUpdated { sync_db_id: i64 },
    SyncRemoved { sync_db_id: i64 },
    SyncDeletionFailed { sync_db_id: i64 },
    SyncProgressInfo { sync_db_id: i64, status: String },
    VfsConversionCompleted { sync_db_id: i64 },
    NodeFolderSizeCompleted { sync_db_id: i64, node_id: NodeId, size: u64 },
    ErrorAdded { server_level: bool, sync_db_id: i64 },
    ErrorsCleared { sync_db_id: i64 },
    LogUploadStatusUpdated { state: String, percent: u64 },
    ShowNotification { title: String, message: String },
    Quit,
}

/// A reply: the exit pair plus an operation-specific JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub exit: ExitInfo,
    #[serde(default)]
    pub result: serde_json::Value,
}

impl Reply {
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            exit: ExitInfo::OK,
            result,
        }
    }

    pub fn error(exit: ExitInfo) -> Self {
        Self {
            exit,
            result: serde_json::Value::Null,
        }
    }
}

// ============================================================================
// Opcode tables
// ============================================================================

const REQUEST_OPS: &[(u16, &str)] = &[
    (10, "UserList"),
    (11, "UserDelete"),
    (15, "AccountList"),
    (20, "DriveList"),
    (21, "DriveDelete"),
    (30, "SyncList"),
    (31, "SyncStart"),
    (32, "SyncStop"),
    (33, "SyncStatus"),
    (34, "SyncAdd"),
    (35, "SyncDelete"),
    (36, "SyncSetSupportsVirtualFiles"),
    (40, "NodeSetGet"),
    (41, "NodeSetSet"),
    (42, "NodeSubfolders"),
    (43, "NodeFolderSize"),
    (50, "ParameterGet"),
    (51, "ParameterSet"),
    (52, "AppStateGet"),
    (53, "AppStateSet"),
    (60, "ErrorList"),
    (61, "ErrorsClear"),
    (70, "LogUpload"),
    (71, "LogUploadCancel"),
    (80, "UpdaterChangeChannel"),
    (90, "Quit"),
];

const SIGNAL_OPS: &[(u16, &str)] = &[
    (110, "UserAdded"),
    (111, "UserUpdated"),
    (112, "UserRemoved"),
    (113, "UserStatusChanged"),
    (115, "AccountAdded"),
    (116, "AccountRemoved"),
    (120, "DriveAdded"),
    (121, "DriveRemoved"),
    (122, "DriveDeletionFailed"),
    (130, "SyncAdded"),
    (131, "SyncUpdated"),
    (132, "SyncRemoved"),
    (133, "SyncDeletionFailed"),
    (134, "SyncProgressInfo"),
    (135, "VfsConversionCompleted"),
    (140, "NodeFolderSizeCompleted"),
    (150, "ErrorAdded"),
    (151, "ErrorsCleared"),
    (160, "LogUploadStatusUpdated"),
    (170, "ShowNotification"),
    (190, "Quit"),
];

fn name_for(table: &[(u16, &'static str)], op: u16) -> Option<&'static str> {
    table.iter().find(|(o, _)| *o == op).map(|(_, n)| *n)
}

fn op_for(table: &[(u16, &str)], name: &str) -> Option<u16> {
    table.iter().find(|(_, n)| *n == name).map(|(o, _)| *o)
}

/// Splits a serde externally-tagged value into `(variant, content)`.
fn split_tagged(value: serde_json::Value) -> Result<(String, serde_json::Value), IpcError> {
    match value {
        serde_json::Value::String(name) => Ok((name, serde_json::Value::Null)),
        serde_json::Value::Object(mut map) if map.len() == 1 => {
            let name = map.keys().next().cloned().unwrap_or_default();
            let content = map.remove(&name).unwrap_or(serde_json::Value::Null);
            Ok((name, content))
        }
        other => Err(IpcError::Codec(format!("Malformed tagged value: {other}"))),
    }
}

fn join_tagged(name: &str, content: serde_json::Value) -> serde_json::Value {
    if content.is_null() {
        serde_json::Value::String(name.to_string())
    } else {
        serde_json::json!({ name: content })
    }
}

impl Request {
    /// Wire opcode plus JSON parameter body.
    pub fn encode(&self) -> Result<(u16, serde_json::Value), IpcError> {
        let value = serde_json::to_value(self).map_err(|e| IpcError::Codec(e.to_string()))?;
        let (name, params) = split_tagged(value)?;
        let op = op_for(REQUEST_OPS, &name)
            .ok_or_else(|| IpcError::Codec(format!("Request '{name}' missing from table")))?;
        Ok((op, params))
    }

    /// Rebuilds a request from its wire opcode and parameter body.
    pub fn decode(op: u16, params: serde_json::Value) -> Result<Self, IpcError> {
        let name = name_for(REQUEST_OPS, op).ok_or(IpcError::UnknownOpcode(op))?;
        serde_json::from_value(join_tagged(name, params))
            .map_err(|e| IpcError::Codec(format!("Bad params for opcode {op}: {e}")))
    }
}

impl Signal {
    pub fn encode(&self) -> Result<(u16, serde_json::Value), IpcError> {
        let value = serde_json::to_value(self).map_err(|e| IpcError::Codec(e.to_string()))?;
        let (name, params) = split_tagged(value)?;
        let op = op_for(SIGNAL_OPS, &name)
            .ok_or_else(|| IpcError::Codec(format!("Signal '{name}' missing from table")))?;
        Ok((op, params))
    }

    pub fn decode(op: u16, params: serde_json::Value) -> Result<Self, IpcError> {
        let name = name_for(SIGNAL_OPS, op).ok_or(IpcError::UnknownOpcode(op))?;
        serde_json::from_value(join_tagged(name, params))
            .map_err(|e| IpcError::Codec(format!("Bad params for signal {op}: {e}")))
    }
}
