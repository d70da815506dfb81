//! Configuration Management
//!
//! Loads engine configuration from TOML files.
//! Configuration includes:
//! - Workspace root
//! - Sync loop behavior (poll interval, default session, warning policy)
//! - Storage locations (backups, session pointer, audit log, checkpoint store)
//! - Validation thresholds

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::RewindError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub validation: ValidationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds between two ticks of the change-detection loop
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Session tracked before any session pointer exists
    #[serde(default = "default_session")]
    pub default_session: String,
    /// Refuse unattended restorations whose validation produced warnings
    #[serde(default)]
    pub block_on_warnings: bool,
    /// Session pinned by `REWIND_SESSION` or `--session`; wins over the stored pointer
    #[serde(skip)]
    pub session: Option<String>,
}

/// Engine file locations, relative to the workspace unless absolute
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
    #[serde(default = "default_session_file")]
    pub session_file: PathBuf,
    #[serde(default = "default_audit_log")]
    pub audit_log: PathBuf,
    #[serde(default = "default_checkpoint_store")]
    pub checkpoint_store: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Total snapshot size above which a slow-operation warning is raised
    #[serde(default = "default_size_warning_bytes")]
    pub size_warning_bytes: u64,
    /// Query version-control status of the workspace
    #[serde(default = "default_true")]
    pub check_vcs: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            sync: SyncConfig::default(),
            storage: StorageConfig::default(),
            validation: ValidationConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            default_session: default_session(),
            block_on_warnings: false,
            session: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backup_dir: default_backup_dir(),
            session_file: default_session_file(),
            audit_log: default_audit_log(),
            checkpoint_store: default_checkpoint_store(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            size_warning_bytes: default_size_warning_bytes(),
            check_vcs: true,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_workspace() -> PathBuf {
    PathBuf::from(".")
}
fn default_poll_interval() -> u64 {
    5
}
fn default_session() -> String {
    "main-thread".to_string()
}
fn default_backup_dir() -> PathBuf {
    PathBuf::from(".rewind/backups")
}
fn default_session_file() -> PathBuf {
    PathBuf::from(".rewind/session.json")
}
fn default_audit_log() -> PathBuf {
    PathBuf::from(".rewind/restore.log")
}
fn default_checkpoint_store() -> PathBuf {
    PathBuf::from(".rewind/checkpoints")
}
fn default_size_warning_bytes() -> u64 {
    10 * 1024 * 1024
}

impl Config {
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config: Config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config from {}", p))?;
                toml::from_str(&content)
                    .map_err(|e| RewindError::Config(format!("{}: {}", p, e)))?
            }
            None => {
                let mut default_paths = vec![PathBuf::from("rewind.toml")];
                if let Some(home) = dirs::home_dir() {
                    default_paths.push(home.join(".config/rewind/config.toml"));
                }

                let mut loaded = None;
                for p in &default_paths {
                    if let Ok(content) = std::fs::read_to_string(p) {
                        loaded = Some(toml::from_str(&content).map_err(|e| {
                            RewindError::Config(format!("{}: {}", p.display(), e))
                        })?);
                        break;
                    }
                }
                loaded.unwrap_or_default()
            }
        };

        // Override with environment variables
        if let Ok(workspace) = std::env::var("REWIND_WORKSPACE") {
            config.workspace = PathBuf::from(workspace);
        }
        if let Ok(interval) = std::env::var("REWIND_POLL_INTERVAL") {
            if let Ok(n) = interval.parse::<u64>() {
                config.sync.poll_interval_secs = n;
            }
        }
        if let Ok(session) = std::env::var("REWIND_SESSION") {
            config.sync.session = Some(session);
        }
        if let Ok(store) = std::env::var("REWIND_CHECKPOINT_STORE") {
            config.storage.checkpoint_store = PathBuf::from(store);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> std::result::Result<(), RewindError> {
        if self.sync.poll_interval_secs == 0 {
            return Err(RewindError::Config(
                "sync.poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.sync.default_session.trim().is_empty() {
            return Err(RewindError::Config(
                "sync.default_session must not be empty".to_string(),
            ));
        }
        if self.sync.session.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(RewindError::Config("session must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.sync.poll_interval_secs)
    }

    fn in_workspace(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace.join(path)
        }
    }

    pub fn backup_root(&self) -> PathBuf {
        self.in_workspace(&self.storage.backup_dir)
    }

    pub fn session_file(&self) -> PathBuf {
        self.in_workspace(&self.storage.session_file)
    }

    pub fn audit_log(&self) -> PathBuf {
        self.in_workspace(&self.storage.audit_log)
    }

    pub fn checkpoint_store(&self) -> PathBuf {
        self.in_workspace(&self.storage.checkpoint_store)
    }
}
