use crate::error::BackupError;
use crate::Result;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use std::path::{Path, PathBuf};

pub const ARCHIVE_PREFIX: &str = "backup_";
pub const ARCHIVE_SUFFIX: &str = ".tar.gz";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Highest collision counter tried within one second
pub const MAX_COUNTER: u32 = 9999;

/// Build the archive file name for a timestamp, e.g. `backup_2025-06-03_14-52-31.tar.gz`
pub fn archive_name(timestamp: &DateTime<Local>) -> String {
    numbered_archive_name(timestamp, 0)
}

/// Archive name with a collision counter: `backup_<ts>_0001.tar.gz`. Counter 0 is the
/// plain name. The padded counter sorts after the plain name and in numeric order.
pub fn numbered_archive_name(timestamp: &DateTime<Local>, counter: u32) -> String {
    compose(&timestamp.format(TIMESTAMP_FORMAT).to_string(), counter)
}

fn compose(stamp: &str, counter: u32) -> String {
    if counter == 0 {
        format!("{ARCHIVE_PREFIX}{stamp}{ARCHIVE_SUFFIX}")
    } else {
        format!("{ARCHIVE_PREFIX}{stamp}_{counter:04}{ARCHIVE_SUFFIX}")
    }
}

/// Split an archive file name into its timestamp text and collision counter
fn split_archive_name(name: &str) -> Option<(&str, u32)> {
    let stem = name
        .strip_prefix(ARCHIVE_PREFIX)?
        .strip_suffix(ARCHIVE_SUFFIX)?;
    let stamp = stem.get(..19)?;
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;

    let counter = match stem.get(19..)? {
        "" => 0,
        rest => {
            let digits = rest.strip_prefix('_')?;
            if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            digits.parse().ok()?
        }
    };
    Some((stamp, counter))
}

/// Collision counter of an archive file name, 0 for the plain name
pub fn archive_counter(name: &str) -> Option<u32> {
    split_archive_name(name).map(|(_, counter)| counter)
}

/// Recover the timestamp encoded in an archive file name
pub fn parse_archive_timestamp(name: &str) -> Option<DateTime<Local>> {
    let (stamp, _) = split_archive_name(name)?;
    let naive = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
    Local.from_local_datetime(&naive).earliest()
}

/// Return `base_path` if it is free, otherwise the next free counter for the same second
pub fn resolve_collision(base_path: &Path) -> Result<PathBuf> {
    if !base_path.exists() {
        return Ok(base_path.to_path_buf());
    }

    let parent = base_path.parent().unwrap_or(Path::new("."));
    let filename = base_path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| BackupError::archive("Invalid archive filename"))?;
    let (stamp, taken) = split_archive_name(filename)
        .ok_or_else(|| BackupError::archive(format!("Not an archive name: {filename}")))?;

    for counter in taken + 1..=MAX_COUNTER {
        let new_path = parent.join(compose(stamp, counter));
        if !new_path.exists() {
            return Ok(new_path);
        }
    }

    Err(BackupError::archive(format!(
        "Too many archive collisions (>{MAX_COUNTER})"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 6, 3, h, m, s).unwrap()
    }

    #[test]
    fn test_archive_name() {
        assert_eq!(
            archive_name(&at(14, 52, 31)),
            "backup_2025-06-03_14-52-31.tar.gz"
        );
        assert_eq!(
            archive_name(&at(9, 5, 1)),
            "backup_2025-06-03_09-05-01.tar.gz"
        );
    }

    #[test]
    fn test_names_sort_like_timestamps() {
        let earlier = archive_name(&at(9, 59, 59));
        let later = archive_name(&at(10, 0, 0));
        assert!(earlier < later);
    }

    #[test]
    fn test_collision_names_sort_after_plain_name() {
        let ts = at(14, 0, 0);
        let plain = archive_name(&ts);
        let first = numbered_archive_name(&ts, 1);
        let second = numbered_archive_name(&ts, 2);
        let tenth = numbered_archive_name(&ts, 10);
        let next_second = archive_name(&at(14, 0, 1));

        assert_eq!(first, "backup_2025-06-03_14-00-00_0001.tar.gz");
        assert!(plain < first);
        assert!(first < second);
        assert!(second < tenth);
        assert!(tenth < next_second);
    }

    #[test]
    fn test_parse_archive_timestamp() {
        let ts = at(14, 52, 31);
        assert_eq!(parse_archive_timestamp(&archive_name(&ts)), Some(ts));
        assert_eq!(
            parse_archive_timestamp("backup_2025-06-03_14-52-31_0002.tar.gz"),
            Some(ts)
        );
        assert_eq!(parse_archive_timestamp("printer.cfg"), None);
        assert_eq!(parse_archive_timestamp("backup_garbage.tar.gz"), None);
        assert_eq!(
            parse_archive_timestamp("backup_2025-06-03_14-52-31-2.tar.gz"),
            None
        );
    }

    #[test]
    fn test_archive_counter() {
        assert_eq!(archive_counter("backup_2025-06-03_14-52-31.tar.gz"), Some(0));
        assert_eq!(
            archive_counter("backup_2025-06-03_14-52-31_0042.tar.gz"),
            Some(42)
        );
        assert_eq!(archive_counter("backup_2025-06-03_14-52-31_42.tar.gz"), None);
    }

    #[test]
    fn test_resolve_collision() {
        let dir = tempdir().unwrap();
        let base_path = dir.path().join("backup_2025-06-03_14-52-31.tar.gz");

        let resolved = resolve_collision(&base_path).unwrap();
        assert_eq!(resolved, base_path);

        File::create(&base_path).unwrap();
        let resolved = resolve_collision(&base_path).unwrap();
        assert_eq!(
            resolved,
            dir.path().join("backup_2025-06-03_14-52-31_0001.tar.gz")
        );

        File::create(&resolved).unwrap();
        let resolved2 = resolve_collision(&base_path).unwrap();
        assert_eq!(
            resolved2,
            dir.path().join("backup_2025-06-03_14-52-31_0002.tar.gz")
        );
    }

    #[test]
    fn test_resolve_collision_continues_from_numbered_name() {
        let dir = tempdir().unwrap();
        let numbered = dir.path().join("backup_2025-06-03_14-52-31_0003.tar.gz");
        File::create(&numbered).unwrap();

        assert_eq!(
            resolve_collision(&numbered).unwrap(),
            dir.path().join("backup_2025-06-03_14-52-31_0004.tar.gz")
        );
    }

    #[test]
    fn test_resolve_collision_rejects_foreign_names() {
        let dir = tempdir().unwrap();
        let foreign = dir.path().join("printer.cfg");
        File::create(&foreign).unwrap();
        assert!(resolve_collision(&foreign).is_err());
    }
}
