//! Supervisor construction

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use cirrus_core::domain::Sync;
use cirrus_core::ports::{SupervisorFactory, SyncSupervisor};
use cirrus_core::ExitResult;
use cirrus_store::SqliteStore;

use crate::supervisor::Supervisor;

/// Builds [`Supervisor`] instances over the shared state store.
pub struct DefaultSupervisorFactory {
    store: SqliteStore,
    tick_interval: Duration,
}

impl DefaultSupervisorFactory {
    pub fn new(store: SqliteStore, tick_interval: Duration) -> Self {
        Self {
            store,
            tick_interval,
        }
    }
}

#[async_trait]
impl SupervisorFactory for DefaultSupervisorFactory {
    async fn create(&self, sync: &Sync) -> ExitResult<Arc<dyn SyncSupervisor>> {
        tracing::debug!(sync_db_id = sync.db_id, "Creating supervisor");
        Ok(Arc::new(Supervisor::new(
            sync.clone(),
            self.store.clone(),
            self.tick_interval,
        )))
    }
}
