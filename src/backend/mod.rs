//! Delivery strategies for a finished backup.
//!
//! Each backend consumes one [`Payload`] per cycle and reports a [`DeliveryResult`]
//! instead of an error, so a failed delivery never escapes the backup loop.

mod git;
mod local;
mod remote;

pub use git::{mirror_directories, GitBackend, GitCli, VersionControl};
pub use local::LocalBackend;
pub use remote::{RcloneSyncer, RemoteBackend, Syncer};

use crate::archive::BackupArchive;
use crate::command::CommandRunner;
use crate::config::{BackendKind, BackupConfig, MonitoredSet};
use crate::Result;

/// What a backend is handed for one backup cycle
#[derive(Debug)]
pub enum Payload<'a> {
    Archive(BackupArchive),
    Directories(&'a MonitoredSet),
}

impl Payload<'_> {
    /// Identifier used in log records
    pub fn label(&self) -> String {
        match self {
            Payload::Archive(archive) => archive.file_name(),
            Payload::Directories(set) => format!("{} directories", set.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    pub success: bool,
    pub message: String,
}

impl DeliveryResult {
    pub fn delivered(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl<E: std::fmt::Display> From<std::result::Result<String, E>> for DeliveryResult {
    fn from(result: std::result::Result<String, E>) -> Self {
        match result {
            Ok(message) => DeliveryResult::delivered(message),
            Err(e) => DeliveryResult::failed(e.to_string()),
        }
    }
}

pub trait Backend {
    fn kind(&self) -> BackendKind;

    /// Whether this backend needs an archive or works on the directories directly
    fn consumes_archive(&self) -> bool {
        true
    }

    /// One-time setup before the first cycle
    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    fn deliver(&mut self, payload: Payload<'_>) -> DeliveryResult;
}

/// Build the backend selected in the configuration with its production collaborators
pub fn build_backend(config: &BackupConfig) -> Box<dyn Backend> {
    let runner = CommandRunner::new(config.command_timeout);
    match config.backend {
        BackendKind::Local => Box::new(LocalBackend::new(config.local.store.clone())),
        BackendKind::Remote => Box::new(RemoteBackend::new(
            config.remote.target.clone(),
            config.remote.folder.clone(),
            Box::new(RcloneSyncer::new(config.remote.program.clone(), runner)),
        )),
        BackendKind::Git => Box::new(GitBackend::new(
            config.git.clone(),
            Box::new(GitCli::new(config.git.program.clone(), runner)),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackupError;

    #[test]
    fn test_delivery_result_from_result() {
        let ok: std::result::Result<String, BackupError> = Ok("stored".to_string());
        assert_eq!(DeliveryResult::from(ok), DeliveryResult::delivered("stored"));

        let err: std::result::Result<String, BackupError> =
            Err(BackupError::delivery("disk full"));
        let result = DeliveryResult::from(err);
        assert!(!result.success);
        assert!(result.message.contains("disk full"));
    }

    #[test]
    fn test_payload_label() {
        let set = MonitoredSet::new(["/a/config", "/a/database"]).unwrap();
        assert_eq!(Payload::Directories(&set).label(), "2 directories");
    }
}
