use crate::archive::{Archiver, TarCompressor};
use crate::backend::{build_backend, Backend, Payload};
use crate::command::CommandRunner;
use crate::config::{BackendKind, BackupConfig};
use crate::retention::RetentionPolicy;
use crate::signal::BackupContext;
use crate::watcher::{NotifyWatcher, Watch};
use crate::{Result, LOG_TARGET};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Idle,
    Archiving,
    Delivering,
    Pruning,
    FailedNonFatal,
    FailedFatal,
}

/// Result of one wakeup. None of these stop the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Delivered {
        backup: String,
        message: String,
        pruned: usize,
    },
    ArchiveFailed {
        message: String,
    },
    DeliveryFailed {
        backup: String,
        message: String,
    },
    PruneFailed {
        backup: String,
        message: String,
    },
}

impl CycleOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CycleOutcome::Delivered { .. })
    }
}

/// The watch → archive → deliver → prune loop
pub struct BackupDaemon {
    config: BackupConfig,
    watcher: Box<dyn Watch>,
    archiver: Archiver,
    backend: Box<dyn Backend>,
    retention: Option<RetentionPolicy>,
    state: DaemonState,
    cycles: u64,
    last_outcome: Option<CycleOutcome>,
}

impl BackupDaemon {
    pub fn new(
        config: BackupConfig,
        watcher: Box<dyn Watch>,
        archiver: Archiver,
        backend: Box<dyn Backend>,
    ) -> Self {
        let retention = match backend.kind() {
            BackendKind::Local => Some(RetentionPolicy::new(config.local.keep)),
            BackendKind::Remote | BackendKind::Git => None,
        };

        Self {
            config,
            watcher,
            archiver,
            backend,
            retention,
            state: DaemonState::Idle,
            cycles: 0,
            last_outcome: None,
        }
    }

    /// Wire the production watcher, tar archiver and configured backend
    pub fn from_config(config: BackupConfig, context: BackupContext) -> Self {
        let runner = CommandRunner::new(config.command_timeout);
        let watcher = NotifyWatcher::new(config.debounce);
        let archiver = Archiver::new(
            Box::new(TarCompressor::new(runner)),
            config.staging_dir.clone(),
            context,
        );
        let backend = build_backend(&config);
        Self::new(config, Box::new(watcher), archiver, backend)
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    pub fn state(&self) -> DaemonState {
        self.state
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn last_outcome(&self) -> Option<&CycleOutcome> {
        self.last_outcome.as_ref()
    }

    /// Run until a fatal error. Individual backup failures are logged and the loop goes
    /// back to waiting, as does a non-fatal error from the watcher.
    pub fn run(&mut self) -> Result<()> {
        match self.archiver.sweep_staging() {
            Ok(0) => {}
            Ok(removed) => info!(target: LOG_TARGET, removed, "removed leftover staged archives"),
            Err(e) => warn!(target: LOG_TARGET, error = %e, "could not sweep staging dir"),
        }
        if let Err(e) = self.backend.prepare() {
            if e.is_fatal() {
                self.state = DaemonState::FailedFatal;
                error!(target: LOG_TARGET, error = %e, "backend preparation failed, stopping");
                return Err(e);
            }
            warn!(target: LOG_TARGET, error = %e, "backend preparation failed");
        }

        info!(
            target: LOG_TARGET,
            backend = %self.backend.kind(),
            directories = self.config.monitored.len(),
            "watching for changes"
        );

        loop {
            self.state = DaemonState::Idle;
            let event = match self.watcher.wait_for_change(&self.config.monitored) {
                Ok(event) => event,
                Err(e) if e.is_fatal() => {
                    self.state = DaemonState::FailedFatal;
                    error!(target: LOG_TARGET, error = %e, "watch failed, stopping");
                    return Err(e);
                }
                Err(e) => {
                    self.state = DaemonState::FailedNonFatal;
                    warn!(target: LOG_TARGET, error = %e, "watch interrupted, waiting again");
                    continue;
                }
            };

            debug!(
                kind = ?event.kind,
                paths = ?event.paths,
                coalesced = event.coalesced,
                "change detected"
            );
            self.run_cycle();
        }
    }

    /// Perform one backup attempt and log its outcome
    pub fn run_cycle(&mut self) -> CycleOutcome {
        self.cycles += 1;
        let outcome = self.attempt();

        self.state = if outcome.is_success() {
            DaemonState::Idle
        } else {
            DaemonState::FailedNonFatal
        };
        self.log_outcome(&outcome);
        self.last_outcome = Some(outcome.clone());
        outcome
    }

    fn attempt(&mut self) -> CycleOutcome {
        let payload = if self.backend.consumes_archive() {
            self.state = DaemonState::Archiving;
            match self.archiver.create_archive(&self.config.monitored) {
                Ok(archive) => {
                    debug!(archive = %archive.summary(), "archive created");
                    Payload::Archive(archive)
                }
                Err(e) => {
                    return CycleOutcome::ArchiveFailed {
                        message: e.to_string(),
                    }
                }
            }
        } else {
            Payload::Directories(&self.config.monitored)
        };

        self.state = DaemonState::Delivering;
        let backup = payload.label();
        let result = self.backend.deliver(payload);
        if !result.success {
            return CycleOutcome::DeliveryFailed {
                backup,
                message: result.message,
            };
        }

        let mut pruned = 0;
        if let Some(policy) = self.retention {
            self.state = DaemonState::Pruning;
            match policy.prune(&self.config.local.store) {
                Ok(removed) => pruned = removed.len(),
                Err(e) => {
                    return CycleOutcome::PruneFailed {
                        backup,
                        message: e.to_string(),
                    }
                }
            }
        }

        CycleOutcome::Delivered {
            backup,
            message: result.message,
            pruned,
        }
    }

    fn log_outcome(&self, outcome: &CycleOutcome) {
        let cycle = self.cycles;
        let backend = self.backend.kind();
        match outcome {
            CycleOutcome::Delivered {
                backup,
                message,
                pruned,
            } => info!(
                target: LOG_TARGET,
                cycle,
                %backend,
                backup = %backup,
                outcome = "success",
                pruned,
                "{message}"
            ),
            CycleOutcome::ArchiveFailed { message } => error!(
                target: LOG_TARGET,
                cycle,
                %backend,
                outcome = "archive_failed",
                "{message}"
            ),
            CycleOutcome::DeliveryFailed { backup, message } => error!(
                target: LOG_TARGET,
                cycle,
                %backend,
                backup = %backup,
                outcome = "delivery_failed",
                "{message}"
            ),
            CycleOutcome::PruneFailed { backup, message } => warn!(
                target: LOG_TARGET,
                cycle,
                %backend,
                backup = %backup,
                outcome = "prune_failed",
                "backup stored but cleanup failed: {message}"
            ),
        }
    }
}
