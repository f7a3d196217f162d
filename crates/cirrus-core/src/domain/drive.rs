//! Drive entity

use serde::{Deserialize, Serialize};

/// A remote drive (one storage space within an account).
///
/// `maintenance` and `access_denied` are runtime flags refreshed from the
/// backend on each poll; they are deliberately not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drive {
    pub db_id: i64,
    /// Remote-side drive id.
    pub drive_id: i64,
    pub account_db_id: i64,
    pub name: String,
    /// Display color as a `#rrggbb` hex string.
    pub color: String,
    pub notifications_enabled: bool,
    #[serde(skip)]
    pub maintenance: bool,
    #[serde(skip)]
    pub access_denied: bool,
}

impl Drive {
    pub fn new(db_id: i64, drive_id: i64, account_db_id: i64, name: impl Into<String>) -> Self {
        Self {
            db_id,
            drive_id,
            account_db_id,
            name: name.into(),
            color: "#0098ff".to_string(),
            notifications_enabled: true,
            maintenance: false,
            access_denied: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_flags_not_serialized() {
        let mut drive = Drive::new(1, 100, 1, "Work");
        drive.maintenance = true;
        drive.access_denied = true;

        let json = serde_json::to_string(&drive).unwrap();
        let parsed: Drive = serde_json::from_str(&json).unwrap();
        assert!(!parsed.maintenance);
        assert!(!parsed.access_denied);
        assert_eq!(parsed.name, "Work");
    }
}
