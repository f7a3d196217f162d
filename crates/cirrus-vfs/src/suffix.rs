//! Suffix-placeholder backend
//!
//! Dehydrated files are represented by a sidecar-free placeholder: the file
//! itself is replaced by `<name>.cirrus` holding a small JSON stub with the
//! original size. Hydration is the supervisor's job; this backend only
//! converts between real files and placeholders and answers status queries.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use cirrus_core::domain::VfsMode;
use cirrus_core::ports::{PinState, VfsAdapter, VfsSetupParams, VfsStatus};
use cirrus_core::{ExitCause, ExitCode, ExitInfo, ExitResult};

/// Reserved extension marking a placeholder file.
pub const PLACEHOLDER_SUFFIX: &str = "cirrus";

/// Content of a placeholder file.
#[derive(Debug, Serialize, Deserialize)]
struct PlaceholderStub {
    size: u64,
}

/// Placeholder backend over one sync's local folder.
#[derive(Debug)]
pub struct SuffixVfs {
    params: VfsSetupParams,
    started: AtomicBool,
    pins: Mutex<HashMap<PathBuf, PinState>>,
}

impl SuffixVfs {
    pub fn new(params: VfsSetupParams) -> Self {
        Self {
            params,
            started: AtomicBool::new(false),
            pins: Mutex::new(HashMap::new()),
        }
    }
}

fn io_error(e: std::io::Error) -> ExitInfo {
    tracing::warn!(error = %e, "Placeholder file operation failed");
    ExitInfo::new(ExitCode::SystemError, ExitCause::FileAccessError)
}

fn is_placeholder_path(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == PLACEHOLDER_SUFFIX)
}

fn placeholder_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(PLACEHOLDER_SUFFIX);
    PathBuf::from(name)
}

/// Replace every real file under `dir` with a placeholder stub.
fn convert_dir(dir: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            convert_dir(&path)?;
        } else if file_type.is_file() && !is_placeholder_path(&path) {
            let size = entry.metadata()?.len();
            let stub = PlaceholderStub { size };
            let content = serde_json::to_vec(&stub).map_err(std::io::Error::other)?;
            std::fs::write(placeholder_path_for(&path), content)?;
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Turn every placeholder under `dir` back into an empty real file.
///
/// Content is not restored here; the supervisor re-downloads it on its next
/// pass. Used when virtual files are switched off for a sync.
pub fn wipe_placeholders(dir: &Path) -> ExitResult {
    fn walk(dir: &Path) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                walk(&path)?;
            } else if is_placeholder_path(&path) {
                let real = path.with_extension("");
                std::fs::File::create(&real)?;
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    walk(dir).map_err(io_error)?;
    tracing::info!(dir = %dir.display(), "Wiped placeholders back to real files");
    Ok(())
}

#[async_trait]
impl VfsAdapter for SuffixVfs {
    fn mode(&self) -> VfsMode {
        VfsMode::Suffix
    }

    fn sync_db_id(&self) -> i64 {
        self.params.sync_db_id
    }

    async fn start(&self) -> ExitResult {
        if !self.params.local_path.is_dir() {
            tracing::warn!(
                path = %self.params.local_path.display(),
                "Cannot start placeholder backend: folder missing"
            );
            return Err(ExitInfo::new(
                ExitCode::SystemError,
                ExitCause::UnableToCreateVfs,
            ));
        }
        self.started.store(true, Ordering::SeqCst);
        tracing::info!(
            sync_db_id = self.params.sync_db_id,
            path = %self.params.local_path.display(),
            "Placeholder backend started"
        );
        Ok(())
    }

    async fn stop(&self, unregister: bool) -> ExitResult {
        self.started.store(false, Ordering::SeqCst);
        if unregister {
            self.pins.lock().map_err(|_| {
                ExitInfo::new(ExitCode::SystemError, ExitCause::Unknown)
            })?.clear();
        }
        tracing::debug!(
            sync_db_id = self.params.sync_db_id,
            unregister,
            "Placeholder backend stopped"
        );
        Ok(())
    }

    async fn convert_dir_to_placeholders(&self, dir: &Path) -> ExitResult {
        convert_dir(dir).map_err(io_error)?;
        tracing::info!(dir = %dir.display(), "Converted folder contents to placeholders");
        Ok(())
    }

    async fn status(&self, path: &Path) -> ExitResult<VfsStatus> {
        let placeholder = placeholder_path_for(path);
        if placeholder.exists() {
            return Ok(VfsStatus {
                is_placeholder: true,
                is_hydrated: false,
                is_syncing: false,
                progress: 0,
            });
        }
        if path.exists() {
            return Ok(VfsStatus {
                is_placeholder: false,
                is_hydrated: true,
                is_syncing: false,
                progress: 100,
            });
        }
        Err(ExitInfo::new(ExitCode::DataError, ExitCause::NotFound))
    }

    async fn set_pin_state(&self, path: &Path, state: PinState) -> ExitResult {
        self.pins
            .lock()
            .map_err(|_| ExitInfo::new(ExitCode::SystemError, ExitCause::Unknown))?
            .insert(path.to_path_buf(), state);
        Ok(())
    }

    async fn clear_file_attributes(&self, path: &Path) -> ExitResult {
        self.pins
            .lock()
            .map_err(|_| ExitInfo::new(ExitCode::SystemError, ExitCause::Unknown))?
            .remove(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter_for(dir: &Path) -> SuffixVfs {
        SuffixVfs::new(VfsSetupParams {
            sync_db_id: 1,
            local_path: dir.to_path_buf(),
            target_path: "/Remote".to_string(),
            mode: VfsMode::Suffix,
        })
    }

    #[tokio::test]
    async fn test_start_fails_without_folder() {
        let vfs = adapter_for(Path::new("/nonexistent/cirrus-test"));
        let err = vfs.start().await.unwrap_err();
        assert_eq!(err.code, ExitCode::SystemError);
        assert_eq!(err.cause, ExitCause::UnableToCreateVfs);
    }

    #[tokio::test]
    async fn test_convert_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("report.txt");
        std::fs::write(&file, b"hello").unwrap();

        let vfs = adapter_for(dir.path());
        vfs.start().await.unwrap();
        vfs.convert_dir_to_placeholders(dir.path()).await.unwrap();

        assert!(!file.exists());
        let status = vfs.status(&file).await.unwrap();
        assert!(status.is_placeholder);
        assert!(!status.is_hydrated);

        let stub: PlaceholderStub = serde_json::from_slice(
            &std::fs::read(placeholder_path_for(&file)).unwrap(),
        )
        .unwrap();
        assert_eq!(stub.size, 5);
    }

    #[tokio::test]
    async fn test_convert_recurses_and_skips_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("a.txt"), b"a").unwrap();

        let vfs = adapter_for(dir.path());
        vfs.convert_dir_to_placeholders(dir.path()).await.unwrap();
        // Second pass leaves existing placeholders alone
        vfs.convert_dir_to_placeholders(dir.path()).await.unwrap();

        assert!(placeholder_path_for(&sub.join("a.txt")).exists());
        assert!(!sub.join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_wipe_restores_real_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("doc.md");
        std::fs::write(&file, b"content").unwrap();

        let vfs = adapter_for(dir.path());
        vfs.convert_dir_to_placeholders(dir.path()).await.unwrap();
        assert!(!file.exists());

        wipe_placeholders(dir.path()).unwrap();
        assert!(file.exists());
        assert!(!placeholder_path_for(&file).exists());

        let status = vfs.status(&file).await.unwrap();
        assert!(status.is_hydrated);
    }

    #[tokio::test]
    async fn test_status_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let vfs = adapter_for(dir.path());
        let err = vfs.status(&dir.path().join("ghost")).await.unwrap_err();
        assert_eq!(err.cause, ExitCause::NotFound);
    }

    #[tokio::test]
    async fn test_pin_state_bookkeeping() {
        let dir = tempfile::tempdir().unwrap();
        let vfs = adapter_for(dir.path());
        let path = dir.path().join("keep.bin");

        vfs.set_pin_state(&path, PinState::AlwaysLocal).await.unwrap();
        vfs.clear_file_attributes(&path).await.unwrap();
        vfs.stop(true).await.unwrap();
    }
}
