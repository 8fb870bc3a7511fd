pub mod archive;
pub mod backend;
pub mod command;
pub mod config;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod naming;
pub mod retention;
pub mod signal;
pub mod utils;
pub mod watcher;

pub use archive::{Archiver, BackupArchive, Clock, Compressor, SystemClock, TarCompressor};
pub use backend::{build_backend, Backend, DeliveryResult, Payload};
pub use command::{CommandOutput, CommandRunner};
pub use config::{create_sample_config, load_config, BackendKind, BackupConfig, MonitoredSet};
pub use daemon::{BackupDaemon, CycleOutcome, DaemonState};
pub use error::BackupError;
pub use naming::{archive_name, parse_archive_timestamp, resolve_collision};
pub use retention::RetentionPolicy;
pub use signal::{install_handler, BackupContext};
pub use watcher::{NotifyWatcher, Watch, WatchEvent};

/// Main library result type
pub type Result<T> = std::result::Result<T, BackupError>;

/// Target attached to every backup outcome log record
pub const LOG_TARGET: &str = "klipper_backup";
