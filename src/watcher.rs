//! Blocking filesystem change detection over the monitored directories.
//!
//! The notify watcher is armed on the first call and stays armed, so changes made while
//! a backup is running are queued in an unbounded channel and wake the next call right
//! away. Nothing is dropped; a burst of writes produces a burst of wakeups unless a
//! debounce window is configured.

use crate::config::MonitoredSet;
use crate::error::BackupError;
use crate::Result;
use notify::event::EventKind;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Modify,
    Remove,
}

/// What woke the daemon up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: ChangeKind,
    pub paths: Vec<PathBuf>,
    /// Further events absorbed by the debounce window
    pub coalesced: usize,
}

pub trait Watch {
    /// Block until something under `paths` is created, modified or removed
    fn wait_for_change(&mut self, paths: &MonitoredSet) -> Result<WatchEvent>;
}

struct Armed {
    // Dropping the watcher stops event delivery
    _watcher: RecommendedWatcher,
    events: Receiver<notify::Result<Event>>,
    roots: MonitoredSet,
}

/// inotify-backed [`Watch`] implementation
pub struct NotifyWatcher {
    debounce: Duration,
    armed: Option<Armed>,
}

impl NotifyWatcher {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            armed: None,
        }
    }

    fn arm(&mut self, paths: &MonitoredSet) -> Result<&Armed> {
        let rearm = match &self.armed {
            Some(armed) => armed.roots != *paths,
            None => true,
        };

        if rearm {
            paths
                .ensure_exist()
                .map_err(|e| BackupError::watch(e.to_string()))?;

            let (tx, rx) = mpsc::channel();
            let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
                let _ = tx.send(res);
            })
            .map_err(|e| BackupError::watch(format!("Cannot start watcher: {e}")))?;

            for path in paths {
                watcher
                    .watch(path, RecursiveMode::Recursive)
                    .map_err(|e| BackupError::watch(format!("{}: {e}", path.display())))?;
                tracing::debug!(path = %path.display(), "watching");
            }

            self.armed = Some(Armed {
                _watcher: watcher,
                events: rx,
                roots: paths.clone(),
            });
        }

        self.armed
            .as_ref()
            .ok_or_else(|| BackupError::watch("watcher not armed"))
    }
}

impl Watch for NotifyWatcher {
    fn wait_for_change(&mut self, paths: &MonitoredSet) -> Result<WatchEvent> {
        let debounce = self.debounce;
        let armed = self.arm(paths)?;

        let mut event = loop {
            let raw = armed
                .events
                .recv()
                .map_err(|_| BackupError::watch("watcher stopped delivering events"))?;
            if let Some(event) = classify(raw, &armed.roots)? {
                break event;
            }
        };

        if !debounce.is_zero() {
            loop {
                match armed.events.recv_timeout(debounce) {
                    Ok(raw) => {
                        if let Some(next) = classify(raw, &armed.roots)? {
                            event.paths.extend(next.paths);
                            event.coalesced += 1;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => break,
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(BackupError::watch("watcher stopped delivering events"))
                    }
                }
            }
        }

        Ok(event)
    }
}

/// Map a raw notify event to a wakeup, ignoring access-only noise
fn classify(raw: notify::Result<Event>, roots: &MonitoredSet) -> Result<Option<WatchEvent>> {
    let event = raw.map_err(|e| BackupError::watch(e.to_string()))?;

    let kind = match event.kind {
        EventKind::Create(_) => ChangeKind::Create,
        EventKind::Modify(_) => ChangeKind::Modify,
        EventKind::Remove(_) => ChangeKind::Remove,
        EventKind::Access(_) | EventKind::Any | EventKind::Other => return Ok(None),
    };

    if kind == ChangeKind::Remove || kind == ChangeKind::Modify {
        if let Some(root) = roots.iter().find(|root| !root.exists()) {
            return Err(BackupError::watch(format!(
                "monitored directory disappeared: {}",
                root.display()
            )));
        }
    }

    Ok(Some(WatchEvent {
        kind,
        paths: event.paths,
        coalesced: 0,
    }))
}
