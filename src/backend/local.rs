use super::{Backend, DeliveryResult, Payload};
use crate::archive::BackupArchive;
use crate::config::BackendKind;
use crate::error::BackupError;
use crate::naming::resolve_collision;
use crate::utils::{cleanup_temp_files, temp_path_for};
use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// Keeps archives in a local backup store
#[derive(Debug, Clone)]
pub struct LocalBackend {
    store: PathBuf,
}

impl LocalBackend {
    pub fn new(store: PathBuf) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Path {
        &self.store
    }

    fn store_archive(&self, archive: &BackupArchive) -> Result<PathBuf> {
        fs::create_dir_all(&self.store).map_err(|e| {
            BackupError::delivery(format!("Cannot create {}: {e}", self.store.display()))
        })?;

        // A record from the same second keeps its name; this one takes the next counter
        let dest = resolve_collision(&self.store.join(archive.file_name()))?;

        // Copy under a temp name first so the store never holds a half-written record
        let temp_path = temp_path_for(&dest)?;
        if let Err(e) = fs::copy(archive.path(), &temp_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(BackupError::delivery(format!(
                "Copy to {} failed: {e}",
                self.store.display()
            )));
        }
        if let Err(e) = fs::rename(&temp_path, &dest) {
            let _ = fs::remove_file(&temp_path);
            return Err(BackupError::delivery(format!(
                "Rename into {} failed: {e}",
                self.store.display()
            )));
        }

        Ok(dest)
    }
}

impl Backend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn prepare(&mut self) -> Result<()> {
        let removed = cleanup_temp_files(&self.store)?;
        if removed > 0 {
            tracing::info!(store = %self.store.display(), removed, "removed interrupted copies");
        }
        Ok(())
    }

    fn deliver(&mut self, payload: Payload<'_>) -> DeliveryResult {
        match payload {
            // The staged archive is removed when `archive` goes out of scope
            Payload::Archive(archive) => self
                .store_archive(&archive)
                .map(|dest| format!("stored {}", dest.display()))
                .into(),
            Payload::Directories(_) => {
                DeliveryResult::failed("local backend needs an archive to store")
            }
        }
    }
}
