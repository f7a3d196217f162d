//! Chunked, resumable support-log upload
//!
//! Lifecycle, persisted in app state so the presentation process can
//! observe it and an interrupted upload can resume after a restart:
//!
//! ```text
//! None -> Archiving -> Uploading -> Success
//!                          |-> Canceled   (cancel requested between chunks)
//!                          \-> Failed     (token kept for resume)
//! ```
//!
//! The transport hands out a resumable token on `begin`; the token is
//! persisted before the first chunk and cleared only on success.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use cirrus_core::domain::{AppStateKey, LogUploadState};
use cirrus_core::{ExitCause, ExitCode, ExitInfo, ExitResult};
use cirrus_store::SqliteStore;

/// Transport over which the log archive travels.
#[async_trait]
pub trait LogTransport: Send + Sync {
    /// Opens an upload session, returning its resumable token.
    async fn begin(&self, total_size: u64) -> ExitResult<String>;

    /// Reopens an interrupted session, returning the committed offset.
    async fn resume(&self, token: &str) -> ExitResult<u64>;

    async fn send_chunk(&self, token: &str, offset: u64, data: &[u8]) -> ExitResult;

    async fn finish(&self, token: &str) -> ExitResult;
}

/// The upload job. Queued on the job pool; cooperative cancellation is
/// checked between chunks, never mid-chunk.
pub struct LogUploadJob {
    store: SqliteStore,
    transport: Arc<dyn LogTransport>,
    log_dir: PathBuf,
    chunk_size: usize,
}

fn db_error(_: cirrus_store::StoreError) -> ExitInfo {
    ExitInfo::new(ExitCode::DbError, ExitCause::DbAccessError)
}

const CANCELED: ExitInfo = ExitInfo {
    code: ExitCode::OperationCanceled,
    cause: ExitCause::OperationCanceled,
};

impl LogUploadJob {
    pub fn new(
        store: SqliteStore,
        transport: Arc<dyn LogTransport>,
        log_dir: PathBuf,
        chunk_size: usize,
    ) -> Self {
        Self {
            store,
            transport,
            log_dir,
            chunk_size: chunk_size.max(1),
        }
    }

    async fn set_state(&self, state: LogUploadState) -> ExitResult {
        self.store
            .set_app_state_value(AppStateKey::LogUploadState, state.as_str())
            .await
            .map_err(db_error)
    }

    async fn set_percent(&self, percent: u64) -> ExitResult {
        self.store
            .set_app_state_value(AppStateKey::LogUploadPercent, &percent.to_string())
            .await
            .map_err(db_error)
    }

    async fn cancel_requested(&self, cancel: &CancellationToken) -> ExitResult<bool> {
        if cancel.is_cancelled() {
            return Ok(true);
        }
        let state = self
            .store
            .app_state_value(AppStateKey::LogUploadState)
            .await
            .map_err(db_error)?;
        Ok(LogUploadState::parse(&state) == Some(LogUploadState::CancelRequested))
    }

    /// Concatenates every `.log` file under the log directory.
    fn build_archive(&self) -> ExitResult<Vec<u8>> {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&self.log_dir)
            .map_err(|_| ExitInfo::new(ExitCode::SystemError, ExitCause::FileAccessError))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|e| e == "log"))
            .collect();
        entries.sort();

        let mut archive = Vec::new();
        for path in entries {
            let content = std::fs::read(&path)
                .map_err(|_| ExitInfo::new(ExitCode::SystemError, ExitCause::FileAccessError))?;
            archive.extend_from_slice(&content);
        }
        Ok(archive)
    }

    /// Runs the upload to completion, cancellation or failure.
    pub async fn run(&self, cancel: CancellationToken) -> ExitResult {
        self.set_state(LogUploadState::Archiving).await?;
        let archive = match self.build_archive() {
            Ok(archive) => archive,
            Err(exit) => {
                self.set_state(LogUploadState::Failed).await?;
                return Err(ExitInfo::new(ExitCode::LogUploadFailed, exit.cause));
            }
        };
        let total = archive.len() as u64;

        // Resume an interrupted session when a token survives in app state.
        let stored_token = self
            .store
            .app_state_value(AppStateKey::LogUploadToken)
            .await
            .map_err(db_error)?;
        let (token, mut offset) = if stored_token.is_empty() {
            let token = match self.transport.begin(total).await {
                Ok(token) => token,
                Err(exit) => {
                    self.set_state(LogUploadState::Failed).await?;
                    return Err(ExitInfo::new(ExitCode::LogUploadFailed, exit.cause));
                }
            };
            self.store
                .set_app_state_value(AppStateKey::LogUploadToken, &token)
                .await
                .map_err(db_error)?;
            (token, 0u64)
        } else {
            let offset = match self.transport.resume(&stored_token).await {
                Ok(offset) => offset,
                Err(exit) => {
                    self.set_state(LogUploadState::Failed).await?;
                    return Err(ExitInfo::new(ExitCode::LogUploadFailed, exit.cause));
                }
            };
            tracing::info!(offset, "Resuming interrupted log upload");
            (stored_token, offset)
        };

        self.set_state(LogUploadState::Uploading).await?;

        while offset < total {
            if self.cancel_requested(&cancel).await? {
                tracing::info!(offset, "Log upload canceled");
                self.set_state(LogUploadState::Canceled).await?;
                return Err(CANCELED);
            }

            let end = (offset as usize + self.chunk_size).min(archive.len());
            let chunk = &archive[offset as usize..end];
            if let Err(exit) = self.transport.send_chunk(&token, offset, chunk).await {
                tracing::warn!(offset, exit = %exit, "Log upload chunk failed");
                self.set_state(LogUploadState::Failed).await?;
                return Err(ExitInfo::new(ExitCode::LogUploadFailed, exit.cause));
            }
            offset = end as u64;

            let percent = if total == 0 { 100 } else { offset * 100 / total };
            self.set_percent(percent).await?;
        }

        if let Err(exit) = self.transport.finish(&token).await {
            self.set_state(LogUploadState::Failed).await?;
            return Err(ExitInfo::new(ExitCode::LogUploadFailed, exit.cause));
        }

        self.store
            .set_app_state_value(AppStateKey::LogUploadToken, "")
            .await
            .map_err(db_error)?;
        self.set_percent(100).await?;
        self.set_state(LogUploadState::Success).await?;
        tracing::info!(total, "Log upload finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cirrus_store::DatabasePool;
    use std::sync::Mutex;

    struct MockTransport {
        chunks: Mutex<Vec<(u64, usize)>>,
        fail_at_chunk: Option<usize>,
        resume_offset: u64,
        finished: Mutex<bool>,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                chunks: Mutex::new(Vec::new()),
                fail_at_chunk: None,
                resume_offset: 0,
                finished: Mutex::new(false),
            }
        }
    }

    #[async_trait]
    impl LogTransport for MockTransport {
        async fn begin(&self, _total_size: u64) -> ExitResult<String> {
            Ok("session-1".to_string())
        }

        async fn resume(&self, _token: &str) -> ExitResult<u64> {
            Ok(self.resume_offset)
        }

        async fn send_chunk(&self, _token: &str, offset: u64, data: &[u8]) -> ExitResult {
            let mut chunks = self.chunks.lock().unwrap();
            if self.fail_at_chunk == Some(chunks.len()) {
                return Err(ExitInfo::new(ExitCode::NetworkError, ExitCause::HttpErr));
            }
            chunks.push((offset, data.len()));
            Ok(())
        }

        async fn finish(&self, _token: &str) -> ExitResult {
            *self.finished.lock().unwrap() = true;
            Ok(())
        }
    }

    async fn setup(log_content: &[u8]) -> (SqliteStore, tempfile::TempDir) {
        let pool = DatabasePool::in_memory().await.unwrap();
        let store = SqliteStore::new(pool.pool().clone());
        store.init_app_state().await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cirrusd.log"), log_content).unwrap();
        (store, dir)
    }

    async fn state_of(store: &SqliteStore) -> LogUploadState {
        let raw = store
            .app_state_value(AppStateKey::LogUploadState)
            .await
            .unwrap();
        LogUploadState::parse(&raw).unwrap()
    }

    #[tokio::test]
    async fn test_upload_success_clears_token() {
        let (store, dir) = setup(b"0123456789").await;
        let transport = Arc::new(MockTransport::new());
        let job = LogUploadJob::new(store.clone(), transport.clone(), dir.path().into(), 4);

        job.run(CancellationToken::new()).await.unwrap();

        assert_eq!(state_of(&store).await, LogUploadState::Success);
        assert_eq!(
            store.app_state_value(AppStateKey::LogUploadToken).await.unwrap(),
            ""
        );
        assert_eq!(
            store
                .app_state_value(AppStateKey::LogUploadPercent)
                .await
                .unwrap(),
            "100"
        );
        // 10 bytes in chunks of 4: offsets 0, 4, 8
        assert_eq!(
            *transport.chunks.lock().unwrap(),
            vec![(0, 4), (4, 4), (8, 2)]
        );
        assert!(*transport.finished.lock().unwrap());
    }

    #[tokio::test]
    async fn test_upload_failure_keeps_token_for_resume() {
        let (store, dir) = setup(b"0123456789").await;
        let mut transport = MockTransport::new();
        transport.fail_at_chunk = Some(1);
        let job = LogUploadJob::new(store.clone(), Arc::new(transport), dir.path().into(), 4);

        let err = job.run(CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.code, ExitCode::LogUploadFailed);
        assert_eq!(state_of(&store).await, LogUploadState::Failed);
        assert_eq!(
            store.app_state_value(AppStateKey::LogUploadToken).await.unwrap(),
            "session-1"
        );
    }

    #[tokio::test]
    async fn test_upload_resumes_from_stored_token() {
        let (store, dir) = setup(b"0123456789").await;
        store
            .set_app_state_value(AppStateKey::LogUploadToken, "session-1")
            .await
            .unwrap();
        let mut transport = MockTransport::new();
        transport.resume_offset = 8;
        let transport = Arc::new(transport);
        let job = LogUploadJob::new(store.clone(), transport.clone(), dir.path().into(), 4);

        job.run(CancellationToken::new()).await.unwrap();

        // Only the tail was re-sent
        assert_eq!(*transport.chunks.lock().unwrap(), vec![(8, 2)]);
        assert_eq!(state_of(&store).await, LogUploadState::Success);
    }

    #[tokio::test]
    async fn test_cancel_between_chunks() {
        let (store, dir) = setup(b"0123456789").await;
        let transport = Arc::new(MockTransport::new());
        let job = LogUploadJob::new(store.clone(), transport.clone(), dir.path().into(), 4);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = job.run(cancel).await.unwrap_err();
        assert_eq!(err.code, ExitCode::OperationCanceled);
        assert_eq!(state_of(&store).await, LogUploadState::Canceled);
        assert!(transport.chunks.lock().unwrap().is_empty());
    }
}
