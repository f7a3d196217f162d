//! One-shot maintenance operations
//!
//! Run from the CLI instead of the daemon loop, against the same store.

use tracing::{info, warn};

use cirrus_store::SqliteStore;

pub const KEYRING_SERVICE: &str = "cirrus";

/// Wipes every node-set row of every sync. The next start of each sync
/// rebuilds its selective-sync state from scratch.
///
/// # Errors
/// Propagates the first store failure.
pub async fn clear_sync_nodes(store: &SqliteStore) -> anyhow::Result<()> {
    let syncs = store.all_syncs().await?;
    for sync in &syncs {
        store.clear_node_sets(sync.db_id).await?;
        info!(sync_db_id = sync.db_id, "Node sets cleared");
    }
    info!(count = syncs.len(), "All sync node sets cleared");
    Ok(())
}

/// Deletes the keyring entry of every user and marks them disconnected.
///
/// # Errors
/// Propagates store failures; unreachable keyring entries are logged and
/// skipped so the sweep always finishes.
pub async fn clear_keychain_keys(store: &SqliteStore) -> anyhow::Result<()> {
    let users = store.all_users().await?;
    for mut user in users {
        let Some(credential_key) = user.credential_key.take() else {
            continue;
        };
        match keyring::Entry::new(KEYRING_SERVICE, &credential_key) {
            Ok(entry) => {
                if let Err(e) = entry.delete_credential() {
                    warn!(email = %user.email, error = %e, "Keyring entry removal failed");
                }
            }
            Err(e) => {
                warn!(email = %user.email, error = %e, "Keyring entry lookup failed");
            }
        }
        store.update_user(&user).await?;
        info!(email = %user.email, "Credential reference cleared");
    }
    Ok(())
}
