//! User and Account entities

use serde::{Deserialize, Serialize};

/// A signed-in identity.
///
/// `credential_key` names the keyring entry holding the user's token; it is
/// `None` while the user is disconnected (never authenticated, or demoted
/// after an invalid-credential error). `to_migrate` marks configurations
/// imported from a previous client generation whose node sets still need
/// to be rebuilt once the user connects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub db_id: i64,
    /// Remote-side user id.
    pub user_id: i64,
    pub name: String,
    pub email: String,
    pub credential_key: Option<String>,
    pub to_migrate: bool,
}

impl User {
    pub fn is_connected(&self) -> bool {
        self.credential_key.is_some()
    }
}

/// Groups the drives a user holds on one remote tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub db_id: i64,
    /// Remote-side account id.
    pub account_id: i64,
    pub user_db_id: i64,
}
