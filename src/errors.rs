use std::path::PathBuf;
use thiserror::Error;

/// The central error type for rewind.
///
/// Per-file restore failures and missing backups never show up here: the
/// synchronizer reports those inside its result values so one bad path
/// cannot abort a whole restoration.
#[derive(Error, Debug)]
pub enum RewindError {
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Checkpoint source error: {0}")]
    Source(#[from] SourceError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Usage error: {0}")]
    Usage(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Failed to prepare backup directory {path}: {message}")]
    BackupDir { path: PathBuf, message: String },

    #[error("Failed to write backup metadata for '{backup_id}': {message}")]
    Metadata { backup_id: String, message: String },

    #[error("Invalid backup id '{0}'")]
    InvalidBackupId(String),

    #[error("Backup '{0}' already exists")]
    BackupExists(String),

    #[error("Restoration task aborted: {0}")]
    Aborted(String),
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Checkpoint source unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed checkpoint at {path}: {message}")]
    Malformed { path: PathBuf, message: String },
}

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Failed to read session pointer {path}: {message}")]
    PointerRead { path: PathBuf, message: String },

    #[error("Failed to write session pointer {path}: {message}")]
    PointerWrite { path: PathBuf, message: String },

    #[error("Failed to append audit record to {path}: {message}")]
    AuditWrite { path: PathBuf, message: String },
}

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Restoration blocked: {}", errors.join("; "))]
    Blocked { errors: Vec<String> },

    #[error("Restoration requires confirmation: {}", warnings.join("; "))]
    ConfirmationRequired { warnings: Vec<String> },
}

pub type Result<T> = std::result::Result<T, RewindError>;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_ERROR: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_VALIDATION_BLOCKED: u8 = 5;
pub const EXIT_CONFIRMATION_REQUIRED: u8 = 6;
pub const EXIT_USAGE_ERROR: u8 = 64;

fn exit_code_for_validation(e: &ValidationError) -> u8 {
    match e {
        ValidationError::Blocked { .. } => EXIT_VALIDATION_BLOCKED,
        ValidationError::ConfirmationRequired { .. } => EXIT_CONFIRMATION_REQUIRED,
    }
}

/// Determine the appropriate process exit code for an error.
pub fn get_exit_code(e: &anyhow::Error) -> u8 {
    if let Some(rewind_err) = e.downcast_ref::<RewindError>() {
        return match rewind_err {
            RewindError::Config(_) => EXIT_CONFIG_ERROR,
            RewindError::Usage(_) => EXIT_USAGE_ERROR,
            RewindError::Validation(v) => exit_code_for_validation(v),
            _ => EXIT_ERROR,
        };
    }

    // Direct enum unwraps fallback
    if let Some(v) = e.downcast_ref::<ValidationError>() {
        return exit_code_for_validation(v);
    }

    EXIT_ERROR
}
