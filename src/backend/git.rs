use super::{Backend, DeliveryResult, Payload};
use crate::command::CommandRunner;
use crate::config::{BackendKind, GitSettings};
use crate::error::BackupError;
use crate::naming::TIMESTAMP_FORMAT;
use crate::Result;
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use walkdir::WalkDir;

/// The version-control operations the git backend relies on
pub trait VersionControl {
    /// Stage every addition, modification and deletion in the working tree
    fn stage_all(&self, repo: &Path) -> Result<()>;
    fn has_staged_changes(&self, repo: &Path) -> Result<bool>;
    /// Current commit id, `None` on a branch with no commits yet
    fn head(&self, repo: &Path) -> Result<Option<String>>;
    fn commit(&self, repo: &Path, message: &str) -> Result<()>;
    fn push(&self, repo: &Path, remote: &str, branch: &str) -> Result<()>;
    /// Move the branch back to `head`, keeping the working tree and index
    fn reset_to(&self, repo: &Path, head: Option<&str>) -> Result<()>;
}

/// Drives the `git` command line
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
    runner: CommandRunner,
}

impl GitCli {
    pub fn new(program: String, runner: CommandRunner) -> Self {
        Self { program, runner }
    }

    fn git(&self, repo: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-C").arg(repo);
        cmd
    }
}

impl VersionControl for GitCli {
    fn stage_all(&self, repo: &Path) -> Result<()> {
        self.runner
            .run(self.git(repo).args(["add", "--all"]))
            .map(|_| ())
    }

    fn has_staged_changes(&self, repo: &Path) -> Result<bool> {
        let output = self
            .runner
            .output(self.git(repo).args(["diff", "--cached", "--quiet"]))?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(BackupError::CommandFailed {
                program: self.program.clone(),
                summary: output.summary(),
            }),
        }
    }

    fn head(&self, repo: &Path) -> Result<Option<String>> {
        let output = self
            .runner
            .output(self.git(repo).args(["rev-parse", "--verify", "--quiet", "HEAD"]))?;
        match output.status.code() {
            Some(0) => Ok(Some(output.stdout.trim().to_string())),
            Some(1) => Ok(None),
            _ => Err(BackupError::CommandFailed {
                program: self.program.clone(),
                summary: output.summary(),
            }),
        }
    }

    fn commit(&self, repo: &Path, message: &str) -> Result<()> {
        self.runner
            .run(self.git(repo).args(["commit", "--quiet", "-m", message]))
            .map(|_| ())
    }

    fn push(&self, repo: &Path, remote: &str, branch: &str) -> Result<()> {
        let refspec = format!("HEAD:refs/heads/{branch}");
        self.runner
            .run(self.git(repo).args(["push", "--quiet", remote, refspec.as_str()]))
            .map(|_| ())
    }

    fn reset_to(&self, repo: &Path, head: Option<&str>) -> Result<()> {
        let mut cmd = self.git(repo);
        match head {
            Some(commit) => cmd.args(["reset", "--soft", commit]),
            None => cmd.args(["update-ref", "-d", "HEAD"]),
        };
        self.runner.run(&mut cmd).map(|_| ())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MirrorStats {
    pub copied: usize,
    pub removed: usize,
}

/// Make `<repo>/<name>` an exact copy of each source directory.
///
/// Files that vanished from a source are deleted from its mirror. Nothing outside the
/// mirrored subdirectories (such as `.git`) is touched. Symlinks to files are copied by
/// content; symlinks to directories are skipped.
pub fn mirror_directories(sources: &[PathBuf], repo: &Path) -> Result<MirrorStats> {
    let mut stats = MirrorStats::default();

    for source in sources {
        let name = source
            .file_name()
            .ok_or_else(|| BackupError::delivery(format!("No name: {}", source.display())))?;
        let mirror = repo.join(name);

        if !source.is_dir() {
            return Err(BackupError::delivery(format!(
                "Monitored directory missing: {}",
                source.display()
            )));
        }
        if mirror.exists() && !fs::symlink_metadata(&mirror)?.is_dir() {
            fs::remove_file(&mirror)?;
            stats.removed += 1;
        }

        // Deletions first, so a file replaced by a directory (or the reverse) can be recreated
        stats.removed += remove_stale(source, &mirror)?;
        stats.copied += copy_changed(source, &mirror)?;
    }

    Ok(stats)
}

fn remove_stale(source: &Path, mirror: &Path) -> Result<usize> {
    if !mirror.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in WalkDir::new(mirror).min_depth(1).contents_first(true) {
        let entry = entry.map_err(walk_error)?;
        let relative = entry.path().strip_prefix(mirror).unwrap_or(entry.path());
        let original = source.join(relative);

        let keep = if entry.file_type().is_dir() {
            fs::symlink_metadata(&original)
                .map(|m| m.is_dir())
                .unwrap_or(false)
        } else if entry.file_type().is_file() {
            fs::metadata(&original).map(|m| m.is_file()).unwrap_or(false)
        } else {
            false
        };

        if !keep {
            if entry.file_type().is_dir() {
                fs::remove_dir_all(entry.path())?;
            } else {
                fs::remove_file(entry.path())?;
            }
            tracing::debug!(path = %entry.path().display(), "removed from mirror");
            removed += 1;
        }
    }

    Ok(removed)
}

fn copy_changed(source: &Path, mirror: &Path) -> Result<usize> {
    fs::create_dir_all(mirror)?;

    let mut copied = 0;
    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry.map_err(walk_error)?;
        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        let target = mirror.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }

        // Resolve symlinks to decide whether there is file content to copy
        let is_file = match fs::metadata(entry.path()) {
            Ok(metadata) => metadata.is_file(),
            Err(e) => {
                tracing::warn!(
                    path = %entry.path().display(),
                    error = %e,
                    "skipping unreadable entry"
                );
                continue;
            }
        };
        if !is_file {
            continue;
        }

        if differs(entry.path(), &target)? {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

fn differs(source: &Path, target: &Path) -> Result<bool> {
    let target_meta = match fs::metadata(target) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e.into()),
    };
    if fs::metadata(source)?.len() != target_meta.len() {
        return Ok(true);
    }
    Ok(fs::read(source)? != fs::read(target)?)
}

fn walk_error(e: walkdir::Error) -> BackupError {
    BackupError::delivery(format!("Cannot walk directory: {e}"))
}

/// Mirrors the monitored directories into a git working copy, commits and pushes
pub struct GitBackend {
    settings: GitSettings,
    vcs: Box<dyn VersionControl>,
}

impl GitBackend {
    pub fn new(settings: GitSettings, vcs: Box<dyn VersionControl>) -> Self {
        Self { settings, vcs }
    }

    fn backup(&self, sources: &[PathBuf]) -> Result<String> {
        let repo = &self.settings.repo;

        let stats = mirror_directories(sources, repo)?;
        tracing::debug!(copied = stats.copied, removed = stats.removed, "mirror updated");

        self.vcs.stage_all(repo)?;
        if !self.vcs.has_staged_changes(repo)? {
            return Ok("no changes to commit".to_string());
        }

        let previous = self.vcs.head(repo)?;
        let message = format!("Backup {}", Local::now().format(TIMESTAMP_FORMAT));
        self.vcs.commit(repo, &message)?;

        if let Err(e) = self
            .vcs
            .push(repo, &self.settings.remote, &self.settings.branch)
        {
            // Undo the local commit so the next cycle sees the changes again
            if let Err(rollback) = self.vcs.reset_to(repo, previous.as_deref()) {
                tracing::warn!(error = %rollback, "could not roll back unpushed commit");
            }
            return Err(e);
        }

        Ok(format!(
            "committed '{message}' and pushed to {}/{}",
            self.settings.remote, self.settings.branch
        ))
    }
}

impl Backend for GitBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Git
    }

    fn consumes_archive(&self) -> bool {
        false
    }

    fn deliver(&mut self, payload: Payload<'_>) -> DeliveryResult {
        match payload {
            Payload::Directories(set) => self.backup(set.paths()).into(),
            Payload::Archive(archive) => self.backup(&archive.sources).into(),
        }
    }
}
