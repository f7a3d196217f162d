//! Crash and self-restart bookkeeping
//!
//! Restart timestamps live in the AppState table so they survive the
//! process. Two recoveries inside the configured window are a crash loop;
//! the daemon then refuses to continue instead of respawning forever. The
//! same limiter is applied to presentation-process restarts the daemon
//! initiates.

use chrono::Utc;
use tracing::{info, warn};

use cirrus_core::domain::{AppStateKey, SELF_RESTART_DISABLED};
use cirrus_core::{ExitCause, ExitCode, ExitInfo, ExitResult};
use cirrus_store::SqliteStore;

pub struct Watchdog {
    store: SqliteStore,
    window_secs: i64,
}

fn db_error(e: cirrus_store::StoreError) -> ExitInfo {
    warn!(error = %e, "Watchdog state access failed");
    ExitInfo::new(ExitCode::DbError, ExitCause::DbAccessError)
}

impl Watchdog {
    pub fn new(store: SqliteStore, window_secs: i64) -> Self {
        Self { store, window_secs }
    }

    async fn timestamp(&self, key: AppStateKey) -> ExitResult<i64> {
        let raw = self.store.app_state_value(key).await.map_err(db_error)?;
        Ok(raw.trim().parse().unwrap_or(0))
    }

    async fn record_now(&self, key: AppStateKey) -> ExitResult {
        let now = Utc::now().timestamp();
        self.store
            .set_app_state_value(key, &now.to_string())
            .await
            .map_err(db_error)
    }

    /// Startup decision: `true` means continue running, `false` means the
    /// process must quit.
    ///
    /// `crash_recovered` is set when the previous run did not shut down
    /// cleanly. A sentinel timestamp of [`SELF_RESTART_DISABLED`] turns
    /// the bookkeeping off for this run and refuses a crash-recovered
    /// start outright.
    ///
    /// # Errors
    /// Returns `DbError/DbAccessError` when the state table is unreadable.
    pub async fn handle_crash_recovery(&self, crash_recovered: bool) -> ExitResult<bool> {
        let last = self
            .timestamp(AppStateKey::LastServerSelfRestartDate)
            .await?;

        if last == SELF_RESTART_DISABLED {
            if crash_recovered {
                warn!("Self-restart disabled, refusing crash-recovered start");
                return Ok(false);
            }
            info!("Self-restart bookkeeping disabled for this run");
            return Ok(true);
        }

        if !crash_recovered {
            return Ok(true);
        }

        let now = Utc::now().timestamp();
        if now - last < self.window_secs {
            warn!(
                last_restart = last,
                window_secs = self.window_secs,
                "Crash loop detected, quitting"
            );
            return Ok(false);
        }

        info!("Recovered from a crash, recording restart");
        self.record_now(AppStateKey::LastServerSelfRestartDate)
            .await?;
        Ok(true)
    }

    /// Whether the daemon may restart the presentation process now.
    /// At most one client restart is allowed per window; a positive answer
    /// records the attempt.
    ///
    /// # Errors
    /// Returns `DbError/DbAccessError` when the state table is unreadable.
    pub async fn may_restart_client(&self) -> ExitResult<bool> {
        let last = self
            .timestamp(AppStateKey::LastClientSelfRestartDate)
            .await?;
        let now = Utc::now().timestamp();
        if now - last < self.window_secs {
            warn!(last_restart = last, "Client restart refused, too recent");
            return Ok(false);
        }
        self.record_now(AppStateKey::LastClientSelfRestartDate)
            .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cirrus_store::DatabasePool;

    async fn setup() -> SqliteStore {
        let pool = DatabasePool::in_memory().await.unwrap();
        let store = SqliteStore::new(pool.pool().clone());
        store.init_app_state().await.unwrap();
        store
    }

    async fn set_restart(store: &SqliteStore, key: AppStateKey, secs_ago: i64) {
        let value = (Utc::now().timestamp() - secs_ago).to_string();
        store.set_app_state_value(key, &value).await.unwrap();
    }

    #[tokio::test]
    async fn test_clean_start_continues() {
        let store = setup().await;
        let watchdog = Watchdog::new(store, 60);
        assert!(watchdog.handle_crash_recovery(false).await.unwrap());
    }

    #[tokio::test]
    async fn test_restart_within_window_is_a_crash_loop() {
        let store = setup().await;
        set_restart(&store, AppStateKey::LastServerSelfRestartDate, 10).await;
        let watchdog = Watchdog::new(store, 60);
        assert!(!watchdog.handle_crash_recovery(true).await.unwrap());
    }

    #[tokio::test]
    async fn test_restart_outside_window_is_allowed() {
        let store = setup().await;
        set_restart(&store, AppStateKey::LastServerSelfRestartDate, 120).await;
        let watchdog = Watchdog::new(store.clone(), 60);
        assert!(watchdog.handle_crash_recovery(true).await.unwrap());

        // The new restart is recorded, so the next crash within the window
        // trips the loop detection.
        let recorded: i64 = store
            .app_state_value(AppStateKey::LastServerSelfRestartDate)
            .await
            .unwrap()
            .parse()
            .unwrap();
        assert!(Utc::now().timestamp() - recorded < 5);
    }

    #[tokio::test]
    async fn test_sentinel_disables_bookkeeping() {
        let store = setup().await;
        store
            .set_app_state_value(
                AppStateKey::LastServerSelfRestartDate,
                &SELF_RESTART_DISABLED.to_string(),
            )
            .await
            .unwrap();
        let watchdog = Watchdog::new(store, 60);

        assert!(watchdog.handle_crash_recovery(false).await.unwrap());
        assert!(!watchdog.handle_crash_recovery(true).await.unwrap());
    }

    #[tokio::test]
    async fn test_client_restart_once_per_window() {
        let store = setup().await;
        set_restart(&store, AppStateKey::LastClientSelfRestartDate, 120).await;
        let watchdog = Watchdog::new(store, 60);

        assert!(watchdog.may_restart_client().await.unwrap());
        assert!(!watchdog.may_restart_client().await.unwrap());
    }
}
