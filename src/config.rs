use crate::error::BackupError;
use crate::utils::{is_within, normalize_path, validate_directory};
use crate::Result;
use configparser::ini::Ini;
use std::collections::HashSet;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "KLIPPER_BACKUP_CONFIG";

const DEFAULT_KEEP: usize = 5;
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;

/// Delivery strategy chosen once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Local,
    Remote,
    Git,
}

impl BackendKind {
    pub const NAMES: [&'static str; 3] = ["local", "remote", "git"];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Remote => "remote",
            BackendKind::Git => "git",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(BackendKind::Local),
            "remote" => Ok(BackendKind::Remote),
            "git" => Ok(BackendKind::Git),
            other => Err(BackupError::config(format!(
                "Unknown backup method '{other}' (expected one of: local, remote, git)"
            ))),
        }
    }
}

/// Ordered, deduplicated, non-empty list of absolute directories to watch and back up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredSet {
    paths: Vec<PathBuf>,
}

impl MonitoredSet {
    pub fn new<I, P>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut seen = HashSet::new();
        let mut names = HashSet::new();
        let mut unique = Vec::new();

        for path in paths {
            let path: PathBuf = path.into();
            if !path.is_absolute() {
                return Err(BackupError::config(format!(
                    "Monitored path must be absolute: {}",
                    path.display()
                )));
            }
            let path = normalize_path(&path);
            if !seen.insert(path.clone()) {
                continue;
            }

            // Each directory lands under its own name in the archive and the git mirror
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| BackupError::config("The filesystem root cannot be monitored"))?;
            if name == ".git" {
                return Err(BackupError::config("A directory named .git cannot be monitored"));
            }
            if !names.insert(name.clone()) {
                return Err(BackupError::DuplicateName { name });
            }
            unique.push(path);
        }

        if unique.is_empty() {
            return Err(BackupError::config("No directories to monitor"));
        }

        Ok(Self { paths: unique })
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PathBuf> {
        self.paths.iter()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Fail fast if any monitored directory is missing or unreadable
    pub fn ensure_exist(&self) -> Result<()> {
        self.paths.iter().try_for_each(|path| validate_directory(path))
    }

    /// Whether `path` lies inside one of the monitored directories
    pub fn contains(&self, path: &Path) -> bool {
        self.paths.iter().any(|dir| is_within(path, dir))
    }
}

impl<'a> IntoIterator for &'a MonitoredSet {
    type Item = &'a PathBuf;
    type IntoIter = std::slice::Iter<'a, PathBuf>;

    fn into_iter(self) -> Self::IntoIter {
        self.paths.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSettings {
    pub store: PathBuf,
    pub keep: NonZeroUsize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    pub target: String,
    pub folder: String,
    pub program: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSettings {
    pub repo: PathBuf,
    pub remote: String,
    pub branch: String,
    pub program: String,
}

/// Immutable configuration resolved before the backup loop starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupConfig {
    pub backend: BackendKind,
    pub monitored: MonitoredSet,
    pub staging_dir: PathBuf,
    /// Zero keeps the one-event-one-backup behavior
    pub debounce: Duration,
    pub command_timeout: Option<Duration>,
    pub local: LocalSettings,
    pub remote: RemoteSettings,
    pub git: GitSettings,
}

impl BackupConfig {
    /// Build and validate a configuration from parsed INI content
    pub fn from_ini(conf: &Ini, backend: BackendKind, home: &Path) -> Result<Self> {
        let get = |section: &str, key: &str| {
            conf.get(section, key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let monitored = match get("backup", "paths") {
            Some(value) => MonitoredSet::new(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from),
            )?,
            None => MonitoredSet::new([home.join("printer_data").join("config")])?,
        };

        let staging_dir = get("backup", "staging_dir")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        let debounce = Duration::from_millis(parse_number(
            get("backup", "debounce_ms"),
            "debounce_ms",
            0,
        )?);
        let command_timeout = match parse_number(
            get("backup", "command_timeout"),
            "command_timeout",
            DEFAULT_COMMAND_TIMEOUT_SECS,
        )? {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let keep = parse_number(get("local", "keep"), "keep", DEFAULT_KEEP as u64)?;
        let keep = usize::try_from(keep)
            .ok()
            .and_then(NonZeroUsize::new)
            .ok_or_else(|| BackupError::config("keep must be a positive number of backups"))?;

        let config = BackupConfig {
            backend,
            monitored,
            staging_dir,
            debounce,
            command_timeout,
            local: LocalSettings {
                store: get("local", "store")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| home.join("printer_data").join("backups")),
                keep,
            },
            remote: RemoteSettings {
                target: get("remote", "target").unwrap_or_else(|| "gdrive".to_string()),
                folder: get("remote", "folder").unwrap_or_else(|| "klipper-backups".to_string()),
                program: get("remote", "program").unwrap_or_else(|| "rclone".to_string()),
            },
            git: GitSettings {
                repo: get("git", "repo")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| home.join("klipper-config-backup")),
                remote: get("git", "remote").unwrap_or_else(|| "origin".to_string()),
                branch: get("git", "branch").unwrap_or_else(|| "main".to_string()),
                program: get("git", "program").unwrap_or_else(|| "git".to_string()),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Check everything the selected backend depends on
    pub fn validate(&self) -> Result<()> {
        self.monitored.ensure_exist()?;

        let mut outputs: Vec<(&str, &Path)> = Vec::new();
        match self.backend {
            BackendKind::Local => {
                outputs.push(("staging_dir", self.staging_dir.as_path()));
                outputs.push(("store", self.local.store.as_path()));
            }
            BackendKind::Remote => {
                outputs.push(("staging_dir", self.staging_dir.as_path()));
                if self.remote.target.contains(':') {
                    return Err(BackupError::config(
                        "remote target is the remote name only, without ':'",
                    ));
                }
            }
            BackendKind::Git => {
                outputs.push(("repo", self.git.repo.as_path()));
                let nested = self
                    .monitored
                    .iter()
                    .find(|dir| is_within(dir, &self.git.repo));
                if let Some(dir) = nested {
                    return Err(BackupError::config(format!(
                        "Monitored directory {} lies inside the git repository",
                        dir.display()
                    )));
                }
                if !self.git.repo.join(".git").exists() {
                    return Err(BackupError::config(format!(
                        "Not a git repository: {}",
                        self.git.repo.display()
                    )));
                }
            }
        }

        for (key, path) in outputs {
            if !path.is_absolute() {
                return Err(BackupError::config(format!(
                    "{key} must be an absolute path: {}",
                    path.display()
                )));
            }
            // Writing into a watched directory would retrigger the daemon forever
            if self.monitored.contains(path) {
                return Err(BackupError::config(format!(
                    "{key} {} lies inside a monitored directory",
                    path.display()
                )));
            }
        }

        Ok(())
    }
}

fn parse_number(value: Option<String>, key: &str, default: u64) -> Result<u64> {
    match value {
        Some(value) => value
            .parse()
            .map_err(|_| BackupError::config(format!("Invalid {key}: {value}"))),
        None => Ok(default),
    }
}

/// Load configuration from file, falling back to defaults for anything unset
pub fn load_config(backend: BackendKind) -> Result<BackupConfig> {
    let home = home_dir()?;
    let config_path = get_config_path()?;

    let mut conf = Ini::new();
    if config_path.exists() {
        conf.load(&config_path).map_err(|e| {
            BackupError::config(format!(
                "Failed to parse config file {}: {e}",
                config_path.display()
            ))
        })?;
        tracing::debug!(path = %config_path.display(), "loaded config file");
    } else {
        tracing::debug!(path = %config_path.display(), "no config file, using defaults");
    }

    BackupConfig::from_ini(&conf, backend, &home)
}

/// Get the configuration file path
pub fn get_config_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }

    if let Some(config_dir) = std::env::var_os("XDG_CONFIG_HOME") {
        Ok(PathBuf::from(config_dir)
            .join("klipper-backup")
            .join("config.ini"))
    } else if let Some(home) = std::env::var_os("HOME") {
        Ok(PathBuf::from(home)
            .join(".config")
            .join("klipper-backup")
            .join("config.ini"))
    } else {
        Err(BackupError::config("Could not determine config directory"))
    }
}

fn home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| BackupError::config("HOME is not set"))
}

/// Sample configuration file with every setting and its default
pub fn create_sample_config() -> String {
    r#"[backup]
# Comma-separated absolute directories to watch and back up
paths = /home/pi/printer_data/config

# Where archives are assembled before delivery
staging_dir = /tmp

# Coalesce events arriving within this window into one backup (0 = off)
debounce_ms = 0

# Seconds before tar/rclone/git is killed (0 = wait forever)
command_timeout = 300

[local]
store = /home/pi/printer_data/backups
keep = 5

[remote]
target = gdrive
folder = klipper-backups
program = rclone

[git]
repo = /home/pi/klipper-config-backup
remote = origin
branch = main
program = git
"#
    .to_string()
}
