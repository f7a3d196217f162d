//! Local spool transport for log uploads
//!
//! The support backend that finally receives log archives is an external
//! collaborator; the daemon hands archives to a spool directory watched by
//! the uploader of the distribution channel. The spool honors the same
//! session contract as a remote transport: resumable token, committed
//! offset, explicit finish.

use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info};

use cirrus_core::{ExitCause, ExitCode, ExitInfo, ExitResult};
use cirrus_jobs::LogTransport;

pub struct SpoolLogTransport {
    spool_dir: PathBuf,
}

fn file_error(e: std::io::Error) -> ExitInfo {
    debug!(error = %e, "Spool access failed");
    ExitInfo::new(ExitCode::SystemError, ExitCause::FileAccessError)
}

impl SpoolLogTransport {
    pub fn new(spool_dir: PathBuf) -> Self {
        Self { spool_dir }
    }

    fn part_path(&self, token: &str) -> ExitResult<PathBuf> {
        // Tokens are file names handed out by begin(); reject anything
        // that would escape the spool directory.
        if token.is_empty() || token.contains(['/', '\\']) || token.contains("..") {
            return Err(ExitInfo::new(ExitCode::DataError, ExitCause::NotFound));
        }
        Ok(self.spool_dir.join(format!("{token}.part")))
    }
}

#[async_trait]
impl LogTransport for SpoolLogTransport {
    async fn begin(&self, total_size: u64) -> ExitResult<String> {
        std::fs::create_dir_all(&self.spool_dir).map_err(file_error)?;
        let token = format!("logs-{}", uuid::Uuid::new_v4());
        std::fs::File::create(self.spool_dir.join(format!("{token}.part")))
            .map_err(file_error)?;
        info!(token = %token, total_size, "Log upload session opened");
        Ok(token)
    }

    async fn resume(&self, token: &str) -> ExitResult<u64> {
        let path = self.part_path(token)?;
        let meta = std::fs::metadata(&path)
            .map_err(|_| ExitInfo::new(ExitCode::DataError, ExitCause::NotFound))?;
        info!(token = %token, offset = meta.len(), "Log upload session resumed");
        Ok(meta.len())
    }

    async fn send_chunk(&self, token: &str, offset: u64, data: &[u8]) -> ExitResult {
        let path = self.part_path(token)?;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(file_error)?;
        file.seek(SeekFrom::Start(offset)).map_err(file_error)?;
        file.write_all(data).map_err(file_error)?;
        Ok(())
    }

    async fn finish(&self, token: &str) -> ExitResult {
        let part = self.part_path(token)?;
        let done = self.spool_dir.join(token);
        std::fs::rename(&part, &done).map_err(file_error)?;
        info!(token = %token, "Log upload session committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_writes_and_commits() {
        let dir = tempfile::tempdir().unwrap();
        let transport = SpoolLogTransport::new(dir.path().to_path_buf());

        let token = transport.begin(10).await.unwrap();
        transport.send_chunk(&token, 0, b"hello").await.unwrap();
        transport.send_chunk(&token, 5, b"world").await.unwrap();
        transport.finish(&token).await.unwrap();

        let committed = std::fs::read(dir.path().join(&token)).unwrap();
        assert_eq!(committed, b"helloworld");
    }

    #[tokio::test]
    async fn test_resume_reports_committed_offset() {
        let dir = tempfile::tempdir().unwrap();
        let transport = SpoolLogTransport::new(dir.path().to_path_buf());

        let token = transport.begin(8).await.unwrap();
        transport.send_chunk(&token, 0, b"part").await.unwrap();

        assert_eq!(transport.resume(&token).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_unknown_token_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let transport = SpoolLogTransport::new(dir.path().to_path_buf());

        let err = transport.resume("missing").await.unwrap_err();
        assert_eq!(err.cause, ExitCause::NotFound);
        let err = transport.resume("../escape").await.unwrap_err();
        assert_eq!(err.cause, ExitCause::NotFound);
    }
}
