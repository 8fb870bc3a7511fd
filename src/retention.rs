use crate::error::BackupError;
use crate::Result;
use std::cmp::Reverse;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Keeps the backup store down to the `keep` most recently modified files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    keep: NonZeroUsize,
}

impl RetentionPolicy {
    pub fn new(keep: NonZeroUsize) -> Self {
        Self { keep }
    }

    pub fn keep(&self) -> usize {
        self.keep.get()
    }

    /// Delete everything in `store` beyond the newest `keep` files and return what was deleted.
    ///
    /// Only regular files directly inside the store are considered. Files with the same
    /// modification time are ordered by name, which matches the timestamped naming.
    pub fn prune(&self, store: &Path) -> Result<Vec<PathBuf>> {
        let mut records = list_records(store)?;
        records.sort_by_key(|(path, modified)| Reverse((*modified, path.clone())));

        let mut pruned = Vec::new();
        for (path, _) in records.into_iter().skip(self.keep.get()) {
            fs::remove_file(&path).map_err(|e| {
                BackupError::prune(format!("Cannot delete {}: {e}", path.display()))
            })?;
            tracing::debug!(path = %path.display(), "pruned old backup");
            pruned.push(path);
        }

        Ok(pruned)
    }
}

fn list_records(store: &Path) -> Result<Vec<(PathBuf, SystemTime)>> {
    let entries = fs::read_dir(store).map_err(|e| {
        BackupError::prune(format!("Cannot list {}: {e}", store.display()))
    })?;

    let mut records = Vec::new();
    for entry in entries {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_file() {
            records.push((entry.path(), metadata.modified()?));
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn policy(keep: usize) -> RetentionPolicy {
        RetentionPolicy::new(NonZeroUsize::new(keep).unwrap())
    }

    /// Create a file and pin its mtime `age_secs` into the past
    fn record(store: &Path, name: &str, age_secs: u64) -> PathBuf {
        let path = store.join(name);
        let file = fs::File::create(&path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .unwrap();
        path
    }

    fn names(store: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(store)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_prune_keeps_newest_by_mtime() {
        let store = tempdir().unwrap();
        record(store.path(), "backup_a.tar.gz", 300);
        record(store.path(), "backup_b.tar.gz", 100);
        record(store.path(), "backup_c.tar.gz", 200);
        record(store.path(), "backup_d.tar.gz", 10);

        let pruned = policy(2).prune(store.path()).unwrap();

        assert_eq!(pruned.len(), 2);
        assert_eq!(names(store.path()), vec!["backup_b.tar.gz", "backup_d.tar.gz"]);
    }

    #[test]
    fn test_prune_under_limit_is_noop() {
        let store = tempdir().unwrap();
        record(store.path(), "backup_a.tar.gz", 20);
        record(store.path(), "backup_b.tar.gz", 10);

        assert!(policy(5).prune(store.path()).unwrap().is_empty());
        assert_eq!(names(store.path()).len(), 2);
    }

    #[test]
    fn test_prune_is_idempotent() {
        let store = tempdir().unwrap();
        for (i, age) in [50, 40, 30, 20, 10].iter().enumerate() {
            record(store.path(), &format!("backup_{i}.tar.gz"), *age);
        }

        let first = policy(3).prune(store.path()).unwrap();
        let after_first = names(store.path());
        let second = policy(3).prune(store.path()).unwrap();

        assert_eq!(first.len(), 2);
        assert!(second.is_empty());
        assert_eq!(names(store.path()), after_first);
    }

    #[test]
    fn test_equal_mtimes_fall_back_to_name() {
        let store = tempdir().unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(60);
        for name in [
            "backup_2025-06-03_14-00-00.tar.gz",
            "backup_2025-06-03_14-00-01.tar.gz",
            "backup_2025-06-03_14-00-02.tar.gz",
        ] {
            let file = fs::File::create(store.path().join(name)).unwrap();
            file.set_modified(mtime).unwrap();
        }

        policy(2).prune(store.path()).unwrap();

        assert_eq!(
            names(store.path()),
            vec![
                "backup_2025-06-03_14-00-01.tar.gz",
                "backup_2025-06-03_14-00-02.tar.gz"
            ]
        );
    }

    #[test]
    fn test_equal_mtimes_keep_numbered_archives_from_same_second() {
        let store = tempdir().unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(60);
        for name in [
            "backup_2025-06-03_14-00-00.tar.gz",
            "backup_2025-06-03_14-00-00_0001.tar.gz",
            "backup_2025-06-03_14-00-00_0002.tar.gz",
        ] {
            let file = fs::File::create(store.path().join(name)).unwrap();
            file.set_modified(mtime).unwrap();
        }

        let pruned = policy(2).prune(store.path()).unwrap();

        assert_eq!(
            pruned,
            vec![store.path().join("backup_2025-06-03_14-00-00.tar.gz")]
        );
        assert_eq!(
            names(store.path()),
            vec![
                "backup_2025-06-03_14-00-00_0001.tar.gz",
                "backup_2025-06-03_14-00-00_0002.tar.gz"
            ]
        );
    }

    #[test]
    fn test_subdirectories_are_ignored() {
        let store = tempdir().unwrap();
        fs::create_dir(store.path().join("manual")).unwrap();
        record(store.path(), "backup_a.tar.gz", 20);
        record(store.path(), "backup_b.tar.gz", 10);

        policy(1).prune(store.path()).unwrap();

        assert!(store.path().join("manual").is_dir());
        assert_eq!(names(store.path()), vec!["backup_b.tar.gz", "manual"]);
    }

    #[test]
    fn test_missing_store_is_prune_error() {
        let dir = tempdir().unwrap();
        let err = policy(1).prune(&dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, BackupError::Prune { .. }));
        assert!(!err.is_fatal());
    }
}
