//! Local-path selection for new syncs

use std::path::{Path, PathBuf};

use cirrus_core::domain::Sync;

/// Picks a usable local folder for a new sync.
///
/// Returns `wanted` itself when it does not exist on disk and is not
/// already claimed by another sync; otherwise tries `"<name> 2"`,
/// `"<name> 3"` and so on until a free candidate is found. Nesting with
/// an existing sync is not resolved here; that is rejected outright when
/// the sync is validated.
pub fn find_good_path_for_new_sync(wanted: &Path, existing: &[Sync]) -> PathBuf {
    let taken =
        |candidate: &Path| existing.iter().any(|sync| candidate == sync.local_path);

    if !wanted.exists() && !taken(wanted) {
        return wanted.to_path_buf();
    }

    let name = wanted
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Sync".to_string());
    let parent = wanted.parent().unwrap_or(Path::new(""));

    let mut suffix = 2u32;
    loop {
        let candidate = parent.join(format!("{name} {suffix}"));
        if !candidate.exists() && !taken(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync_at(path: &Path) -> Sync {
        Sync {
            db_id: 1,
            drive_db_id: 1,
            local_path: path.to_path_buf(),
            target_path: "/Drive".to_string(),
            target_node_id: None,
            supports_virtual_files: false,
            virtual_file_mode: cirrus_core::domain::VfsMode::Off,
            navigation_pane_handle: None,
            paused: false,
        }
    }

    #[test]
    fn test_free_path_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let wanted = dir.path().join("Drive");
        assert_eq!(find_good_path_for_new_sync(&wanted, &[]), wanted);
    }

    #[test]
    fn test_existing_folder_gets_numeric_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let wanted = dir.path().join("Drive");
        std::fs::create_dir(&wanted).unwrap();
        std::fs::create_dir(dir.path().join("Drive 2")).unwrap();

        assert_eq!(
            find_good_path_for_new_sync(&wanted, &[]),
            dir.path().join("Drive 3")
        );
    }

    #[test]
    fn test_path_claimed_by_another_sync_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let wanted = dir.path().join("Drive");
        let existing = sync_at(&wanted);

        assert_eq!(
            find_good_path_for_new_sync(&wanted, &[existing]),
            dir.path().join("Drive 2")
        );
    }
}
