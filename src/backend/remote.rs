use super::{Backend, DeliveryResult, Payload};
use crate::command::CommandRunner;
use crate::config::BackendKind;
use crate::Result;
use std::path::Path;
use std::process::Command;

/// Uploads a file to a named remote storage target
pub trait Syncer {
    fn upload(&self, file: &Path, target: &str, folder: &str) -> Result<()>;
}

/// `rclone copy <file> <target>:<folder>`
#[derive(Debug, Clone)]
pub struct RcloneSyncer {
    program: String,
    runner: CommandRunner,
}

impl RcloneSyncer {
    pub fn new(program: String, runner: CommandRunner) -> Self {
        Self { program, runner }
    }

    fn command(&self, file: &Path, target: &str, folder: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("copy").arg(file).arg(format!("{target}:{folder}"));
        cmd
    }
}

impl Syncer for RcloneSyncer {
    fn upload(&self, file: &Path, target: &str, folder: &str) -> Result<()> {
        self.runner
            .run(&mut self.command(file, target, folder))
            .map(|_| ())
    }
}

/// Sends each archive to remote storage. The local archive is discarded after every
/// attempt, so a failed upload is not retried.
pub struct RemoteBackend {
    target: String,
    folder: String,
    syncer: Box<dyn Syncer>,
}

impl RemoteBackend {
    pub fn new(target: String, folder: String, syncer: Box<dyn Syncer>) -> Self {
        Self {
            target,
            folder,
            syncer,
        }
    }
}

impl Backend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn deliver(&mut self, payload: Payload<'_>) -> DeliveryResult {
        let archive = match payload {
            Payload::Archive(archive) => archive,
            Payload::Directories(_) => {
                return DeliveryResult::failed("remote backend needs an archive to upload")
            }
        };

        let destination = format!("{}:{}", self.target, self.folder);
        self.syncer
            .upload(archive.path(), &self.target, &self.folder)
            .map(|()| format!("uploaded {} to {destination}", archive.file_name()))
            .into()
    }
}
