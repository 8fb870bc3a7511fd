use crate::error::BackupError;
use crate::Result;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Prefix for files that are still being written; never counted as finished backups
pub const TEMP_PREFIX: &str = ".klipper_backup_tmp_";

/// Validate that a monitored path exists, is a directory and is readable
pub fn validate_directory(path: &Path) -> Result<()> {
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => {
            return Err(BackupError::config(format!(
                "Not a directory: {}",
                path.display()
            )))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(BackupError::SourceNotFound {
                path: path.to_path_buf(),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(BackupError::PermissionDenied {
                path: path.to_path_buf(),
            })
        }
        Err(e) => return Err(BackupError::Io(e)),
    }

    match fs::read_dir(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(BackupError::PermissionDenied {
                path: path.to_path_buf(),
            })
        }
        Err(e) => Err(BackupError::Io(e)),
    }
}

/// Lexically normalize an absolute path (drops `.` and resolves `..`) without touching the disk
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Whether `path` is `dir` itself or lies somewhere beneath it
pub fn is_within(path: &Path, dir: &Path) -> bool {
    normalize_path(path).starts_with(normalize_path(dir))
}

/// Temp name used while a file is copied into `dest`'s directory
pub fn temp_path_for(dest: &Path) -> Result<PathBuf> {
    let parent = dest.parent().unwrap_or(Path::new("."));
    let filename = dest
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| BackupError::delivery("Invalid backup filename"))?;

    let temp_name = format!("{TEMP_PREFIX}{}_{filename}", std::process::id());
    Ok(parent.join(temp_name))
}

/// Remove leftover temp files from an earlier run that was killed mid-copy
pub fn cleanup_temp_files(dir: &Path) -> Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_temp = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.starts_with(TEMP_PREFIX))
            .unwrap_or(false);

        if is_temp && fs::remove_file(&path).is_ok() {
            tracing::debug!(path = %path.display(), "removed stale temp file");
            removed += 1;
        }
    }

    Ok(removed)
}

/// Format byte size in human-readable format
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: u64 = 1024;

    if bytes < THRESHOLD {
        return format!("{bytes} B");
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= THRESHOLD as f64 && unit_index < UNITS.len() - 1 {
        size /= THRESHOLD as f64;
        unit_index += 1;
    }

    let unit = UNITS[unit_index];
    format!("{size:.1} {unit}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_validate_directory() {
        let dir = tempdir().unwrap();
        assert!(validate_directory(dir.path()).is_ok());

        let missing = dir.path().join("missing");
        assert!(matches!(
            validate_directory(&missing),
            Err(BackupError::SourceNotFound { .. })
        ));

        let file = dir.path().join("printer.cfg");
        fs::write(&file, "[printer]").unwrap();
        assert!(matches!(
            validate_directory(&file),
            Err(BackupError::Config { .. })
        ));
    }

    #[test]
    fn test_is_within() {
        let cfg = Path::new("/home/pi/printer_data/config");
        assert!(is_within(Path::new("/home/pi/printer_data/config"), cfg));
        assert!(is_within(Path::new("/home/pi/printer_data/config/backups"), cfg));
        assert!(is_within(
            Path::new("/home/pi/printer_data/logs/../config/x"),
            cfg
        ));
        assert!(!is_within(Path::new("/home/pi/printer_data/configs"), cfg));
        assert!(!is_within(Path::new("/home/pi/backups"), cfg));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/a/./b/../c")),
            PathBuf::from("/a/c")
        );
        assert_eq!(normalize_path(Path::new("/a/b/")), PathBuf::from("/a/b"));
    }

    #[test]
    fn test_temp_path_for() {
        let dest = Path::new("/store/backup_2025-06-03_14-52-31.tar.gz");
        let temp = temp_path_for(dest).unwrap();
        assert_eq!(temp.parent(), Some(Path::new("/store")));
        let name = temp.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(TEMP_PREFIX));
        assert!(name.ends_with("backup_2025-06-03_14-52-31.tar.gz"));
    }

    #[test]
    fn test_cleanup_temp_files() {
        let dir = tempdir().unwrap();
        let stale = dir.path().join(format!("{TEMP_PREFIX}123_backup.tar.gz"));
        let kept = dir.path().join("backup_2025-06-03_14-52-31.tar.gz");
        fs::write(&stale, "partial").unwrap();
        fs::write(&kept, "complete").unwrap();

        assert_eq!(cleanup_temp_files(dir.path()).unwrap(), 1);
        assert!(!stale.exists());
        assert!(kept.exists());
    }

    #[test]
    fn test_cleanup_temp_files_nonexistent_dir() {
        let dir = tempdir().unwrap();
        assert_eq!(cleanup_temp_files(&dir.path().join("nope")).unwrap(), 0);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(1024 * 1024), "1.0 MB");
    }
}
