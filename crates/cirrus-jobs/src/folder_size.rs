//! Recursive folder-size computation
//!
//! Queued as a normal-priority job; the dispatch task never walks a tree
//! inline.

use std::path::Path;

use cirrus_core::{ExitCause, ExitCode, ExitInfo, ExitResult};

/// Total size in bytes of every file under `dir`.
pub fn compute_folder_size(dir: &Path) -> ExitResult<u64> {
    fn walk(dir: &Path) -> std::io::Result<u64> {
        let mut total = 0u64;
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                total += walk(&entry.path())?;
            } else if file_type.is_file() {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }

    walk(dir).map_err(|e| {
        tracing::warn!(dir = %dir.display(), error = %e, "Folder size computation failed");
        ExitInfo::new(ExitCode::SystemError, ExitCause::FileAccessError)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_sums_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), vec![0u8; 100]).unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("b.bin"), vec![0u8; 50]).unwrap();

        assert_eq!(compute_folder_size(dir.path()).unwrap(), 150);
    }

    #[test]
    fn test_size_of_empty_folder() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(compute_folder_size(dir.path()).unwrap(), 0);
    }

    #[test]
    fn test_size_of_missing_folder_fails() {
        let err = compute_folder_size(Path::new("/nonexistent/cirrus")).unwrap_err();
        assert_eq!(err.cause, ExitCause::FileAccessError);
    }
}
