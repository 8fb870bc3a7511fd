use crate::command::CommandRunner;
use crate::config::MonitoredSet;
use crate::error::BackupError;
use crate::naming::{
    archive_counter, numbered_archive_name, parse_archive_timestamp, resolve_collision,
    MAX_COUNTER,
};
use crate::signal::{BackupContext, StagedFileGuard};
use crate::utils::{format_size, validate_directory};
use crate::Result;
use chrono::{DateTime, Local};
use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Packs a set of directories into one compressed file
pub trait Compressor {
    /// Write `dest` so that each source directory appears under its own name
    fn compress(&self, sources: &[PathBuf], dest: &Path) -> Result<()>;
}

/// Produces `.tar.gz` files with the system `tar`
#[derive(Debug, Clone)]
pub struct TarCompressor {
    program: String,
    runner: CommandRunner,
}

impl TarCompressor {
    pub fn new(runner: CommandRunner) -> Self {
        Self {
            program: "tar".to_string(),
            runner,
        }
    }
}

impl Compressor for TarCompressor {
    fn compress(&self, sources: &[PathBuf], dest: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-czf").arg(dest);

        for source in sources {
            let parent = source.parent().unwrap_or(Path::new("/"));
            let name = source
                .file_name()
                .ok_or_else(|| BackupError::archive(format!("No name: {}", source.display())))?;
            cmd.arg("-C").arg(parent).arg(name);
        }

        self.runner
            .run(&mut cmd)
            .map(|_| ())
            .map_err(|e| BackupError::archive(e.to_string()))
    }
}

/// Source of archive timestamps
pub trait Clock {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// One compressed snapshot of the monitored set. The staged file is deleted when
/// this value is dropped, so an archive never outlives its delivery attempt.
#[derive(Debug)]
pub struct BackupArchive {
    pub created_at: DateTime<Local>,
    pub size: u64,
    pub sources: Vec<PathBuf>,
    staged: StagedFileGuard,
}

impl BackupArchive {
    pub fn path(&self) -> &Path {
        self.staged.path()
    }

    pub fn file_name(&self) -> String {
        self.path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} ({} directories, {})",
            self.file_name(),
            self.sources.len(),
            format_size(self.size)
        )
    }
}

pub struct Archiver {
    compressor: Box<dyn Compressor>,
    clock: Box<dyn Clock>,
    staging_dir: PathBuf,
    context: BackupContext,
    // Second and counter of the last name handed out. Staged files are deleted after
    // delivery, so the staging dir alone can't reveal a same-second collision.
    last_issued: Cell<Option<(i64, u32)>>,
}

impl Archiver {
    pub fn new(
        compressor: Box<dyn Compressor>,
        staging_dir: PathBuf,
        context: BackupContext,
    ) -> Self {
        Self {
            compressor,
            clock: Box::new(SystemClock),
            staging_dir,
            context,
            last_issued: Cell::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    fn next_destination(&self, created_at: &DateTime<Local>) -> Result<PathBuf> {
        let second = created_at.timestamp();
        let start = match self.last_issued.get() {
            Some((last, counter)) if last == second => counter + 1,
            _ => 0,
        };
        if start > MAX_COUNTER {
            return Err(BackupError::archive(format!(
                "More than {MAX_COUNTER} archives in one second"
            )));
        }

        let dest =
            resolve_collision(&self.staging_dir.join(numbered_archive_name(created_at, start)))?;
        let counter = dest
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(archive_counter)
            .unwrap_or(start);
        self.last_issued.set(Some((second, counter)));
        Ok(dest)
    }

    /// Remove archives a previous run left in the staging dir. Only files named like
    /// archives are touched, since the staging dir may be shared.
    pub fn sweep_staging(&self) -> Result<usize> {
        let entries = match fs::read_dir(&self.staging_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let is_archive = parse_archive_timestamp(&name.to_string_lossy()).is_some();
            if is_archive && entry.file_type()?.is_file() {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Package every monitored directory into a fresh timestamped archive
    pub fn create_archive(&self, paths: &MonitoredSet) -> Result<BackupArchive> {
        for path in paths {
            validate_directory(path)
                .map_err(|e| BackupError::archive(format!("{}: {e}", path.display())))?;
        }

        fs::create_dir_all(&self.staging_dir).map_err(|e| {
            BackupError::archive(format!(
                "Cannot create staging dir {}: {e}",
                self.staging_dir.display()
            ))
        })?;

        let created_at = self.clock.now();
        let dest = self.next_destination(&created_at)?;

        // Registered before writing so a failed or interrupted run leaves nothing behind
        let staged = self.context.stage(dest.clone());
        self.compressor.compress(paths.paths(), &dest)?;

        let size = fs::metadata(&dest)
            .map_err(|e| BackupError::archive(format!("Archive missing after compression: {e}")))?
            .len();

        Ok(BackupArchive {
            created_at,
            size,
            sources: paths.paths().to_vec(),
            staged,
        })
    }
}
