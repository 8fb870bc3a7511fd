use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Shared state between the backup loop and the signal handler: the interrupt
/// flag and the set of transient files that must not outlive the process
#[derive(Clone)]
pub struct BackupContext {
    interrupt_flag: Arc<AtomicBool>,
    staged_files: Arc<Mutex<HashSet<PathBuf>>>,
}

impl BackupContext {
    pub fn new() -> Self {
        Self {
            interrupt_flag: Arc::new(AtomicBool::new(false)),
            staged_files: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt_flag.load(Ordering::SeqCst)
    }

    pub fn set_interrupted(&self, interrupted: bool) {
        self.interrupt_flag.store(interrupted, Ordering::SeqCst);
    }

    /// Track a transient file; the returned guard deletes it when dropped
    pub fn stage(&self, path: PathBuf) -> StagedFileGuard {
        if let Ok(mut staged) = self.staged_files.lock() {
            staged.insert(path.clone());
        }
        StagedFileGuard {
            path,
            context: self.clone(),
        }
    }

    pub fn staged_files(&self) -> Vec<PathBuf> {
        self.staged_files
            .lock()
            .map(|staged| staged.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Delete every tracked transient file and clear the registry
    pub fn cleanup_staged_files(&self) {
        for path in self.staged_files() {
            remove_quietly(&path);
        }
        if let Ok(mut staged) = self.staged_files.lock() {
            staged.clear();
        }
    }

    fn unstage(&self, path: &Path) {
        if let Ok(mut staged) = self.staged_files.lock() {
            staged.remove(path);
        }
    }
}

impl Default for BackupContext {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard removing a staged file on drop, whether the backup succeeded or not
#[derive(Debug)]
pub struct StagedFileGuard {
    path: PathBuf,
    context: BackupContext,
}

impl StagedFileGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedFileGuard {
    fn drop(&mut self) {
        // Once interrupted, the signal handler owns cleanup
        if self.context.is_interrupted() {
            return;
        }
        remove_quietly(&self.path);
        self.context.unstage(&self.path);
    }
}

impl std::fmt::Debug for BackupContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupContext")
            .field("interrupted", &self.is_interrupted())
            .field("staged_files", &self.staged_files())
            .finish()
    }
}

fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed staged file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not remove staged file")
        }
    }
}

/// Install the SIGINT/SIGTERM handler: drop staged archives and exit with 130
pub fn install_handler(context: BackupContext) -> crate::Result<()> {
    ctrlc::set_handler(move || {
        context.set_interrupted(true);
        tracing::info!(target: crate::LOG_TARGET, "termination requested, cleaning up");
        context.cleanup_staged_files();
        std::process::exit(crate::BackupError::Interrupted.exit_code());
    })
    .map_err(|e| crate::BackupError::config(format!("Cannot install signal handler: {e}")))
}
