use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Monitored directory not found: {path}")]
    SourceNotFound { path: PathBuf },

    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("Monitored directories share the name '{name}'")]
    DuplicateName { name: String },

    #[error("Watch failed: {message}")]
    Watch { message: String },

    #[error("Archive failed: {message}")]
    Archive { message: String },

    #[error("Delivery failed: {message}")]
    Delivery { message: String },

    #[error("Retention cleanup failed: {message}")]
    Prune { message: String },

    #[error("{program} failed: {summary}")]
    CommandFailed { program: String, summary: String },

    #[error("{program} timed out after {}s", .timeout.as_secs())]
    CommandTimeout { program: String, timeout: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Interrupted by signal")]
    Interrupted,
}

impl BackupError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn watch(message: impl Into<String>) -> Self {
        Self::Watch {
            message: message.into(),
        }
    }

    pub fn archive(message: impl Into<String>) -> Self {
        Self::Archive {
            message: message.into(),
        }
    }

    pub fn delivery(message: impl Into<String>) -> Self {
        Self::Delivery {
            message: message.into(),
        }
    }

    pub fn prune(message: impl Into<String>) -> Self {
        Self::Prune {
            message: message.into(),
        }
    }

    /// Fatal errors stop the daemon; everything else only fails one backup cycle
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BackupError::Config { .. }
                | BackupError::SourceNotFound { .. }
                | BackupError::DuplicateName { .. }
                | BackupError::Watch { .. }
                | BackupError::Interrupted
        )
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            BackupError::Interrupted => 130,
            BackupError::Config { .. }
            | BackupError::SourceNotFound { .. }
            | BackupError::DuplicateName { .. } => 2,
            _ => 1,
        }
    }

    /// Operator hints logged next to a fatal error
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            BackupError::SourceNotFound { path } => vec![
                format!("Create {} or remove it from [backup] paths", path.display()),
                "Check the paths setting in config.ini".to_string(),
            ],
            BackupError::DuplicateName { name } => vec![format!(
                "Only one monitored directory may be called '{name}'"
            )],
            BackupError::Watch { .. } => vec![
                "Check that no monitored directory was removed or renamed".to_string(),
                "Raise fs.inotify.max_user_watches if the watch limit was hit".to_string(),
            ],
            BackupError::PermissionDenied { .. } => vec![
                "Check directory permissions".to_string(),
                "Run the service as the user owning the printer data".to_string(),
            ],
            _ => vec![],
        }
    }
}
