//! Restoration Validator
//!
//! Pre-flight checks run before any file is touched. Each check reads live
//! workspace state only and contributes either blocking errors or advisory
//! warnings:
//! - Lock detection (warning)
//! - Version-control cleanliness (warning)
//! - Total snapshot size (warning)
//! - Parent directory write permission (error)
//!
//! Reports are computed fresh on every call; locks, permissions and VCS
//! status can change between two calls.

use git2::{Repository, StatusOptions};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::checkpoint::{CheckpointId, FileSnapshots};
use crate::config::Config;
use crate::errors::ValidationError;
use crate::fsutil::resolve;
use crate::observability::telemetry::sanitize_for_log;

const MIB: u64 = 1024 * 1024;
pub const DEFAULT_SIZE_WARNING_BYTES: u64 = 10 * MIB;

/// Working-tree summary of a version-controlled workspace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcsStatus {
    pub modified_count: usize,
    pub untracked_count: usize,
    pub total_changes: usize,
}

impl VcsStatus {
    pub fn has_changes(&self) -> bool {
        self.total_changes > 0
    }
}

/// Outcome of a pre-flight check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub checkpoint_id: CheckpointId,
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub requires_confirmation: bool,
    /// Same verdict as `valid`, kept for consumers of the original report shape
    pub safe_to_proceed: bool,
    pub locked: Vec<String>,
    pub vcs: Option<VcsStatus>,
    pub total_bytes: u64,
}

impl ValidationReport {
    fn new(checkpoint_id: CheckpointId, errors: Vec<String>, warnings: Vec<String>) -> Self {
        let valid = errors.is_empty();
        Self {
            checkpoint_id,
            valid,
            requires_confirmation: !warnings.is_empty(),
            safe_to_proceed: valid,
            errors,
            warnings,
            locked: Vec::new(),
            vcs: None,
            total_bytes: 0,
        }
    }

    /// Gate a restoration on this report.
    ///
    /// Errors always refuse. Warnings refuse unless the caller confirmed.
    pub fn ensure_allowed(&self, confirmed: bool) -> Result<(), ValidationError> {
        if !self.valid {
            return Err(ValidationError::Blocked {
                errors: self.errors.clone(),
            });
        }
        if self.requires_confirmation && !confirmed {
            return Err(ValidationError::ConfirmationRequired {
                warnings: self.warnings.clone(),
            });
        }
        Ok(())
    }
}

/// Decides whether restoring a set of file snapshots into a workspace is safe
#[derive(Debug, Clone)]
pub struct RestorationValidator {
    workspace_root: PathBuf,
    size_warning_bytes: u64,
    check_vcs: bool,
    engine_paths: Vec<PathBuf>,
}

impl RestorationValidator {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            size_warning_bytes: DEFAULT_SIZE_WARNING_BYTES,
            check_vcs: true,
            engine_paths: Vec::new(),
        }
    }

    /// Validator configured from the engine config.
    ///
    /// The engine's own files (backups, pointer, audit log, checkpoint store)
    /// are excluded from the VCS cleanliness count.
    pub fn from_config(config: &Config) -> Self {
        let engine_paths = [
            &config.storage.backup_dir,
            &config.storage.session_file,
            &config.storage.audit_log,
            &config.storage.checkpoint_store,
        ]
        .into_iter()
        .filter(|p| p.is_relative())
        .cloned()
        .collect();

        Self {
            workspace_root: config.workspace.clone(),
            size_warning_bytes: config.validation.size_warning_bytes,
            check_vcs: config.validation.check_vcs,
            engine_paths,
        }
    }

    pub fn with_size_warning_bytes(mut self, bytes: u64) -> Self {
        self.size_warning_bytes = bytes;
        self
    }

    pub fn with_vcs_check(mut self, enabled: bool) -> Self {
        self.check_vcs = enabled;
        self
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Run every check and merge the findings
    pub fn validate(
        &self,
        target_checkpoint_id: &CheckpointId,
        file_snapshots: &FileSnapshots,
    ) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let locked = self.check_file_locks(file_snapshots);
        if !locked.is_empty() {
            warnings.push(format!("Files may be in use: {}", locked.join(", ")));
        }

        let vcs = if self.check_vcs {
            self.vcs_status()
        } else {
            None
        };
        if let Some(ref status) = vcs {
            if status.has_changes() {
                warnings.push(format!(
                    "Git working tree has uncommitted changes: {} modified, {} untracked",
                    status.modified_count, status.untracked_count
                ));
            }
        }

        let total_bytes: u64 = file_snapshots.values().map(|c| c.len() as u64).sum();
        if total_bytes > self.size_warning_bytes {
            warnings.push(format!(
                "Large restoration ({}MB) - may take time",
                total_bytes / MIB
            ));
        }

        for path in self.check_write_permissions(file_snapshots) {
            errors.push(format!("No write permission: {}", path));
        }

        let mut report = ValidationReport::new(target_checkpoint_id.clone(), errors, warnings);
        report.locked = locked;
        report.vcs = vcs;
        report.total_bytes = total_bytes;

        debug!(
            checkpoint = %sanitize_for_log(target_checkpoint_id.as_str()),
            valid = report.valid,
            warnings = report.warnings.len(),
            "Validation finished"
        );
        report
    }

    /// Existing targets that cannot be opened for writing
    fn check_file_locks(&self, file_snapshots: &FileSnapshots) -> Vec<String> {
        file_snapshots
            .keys()
            .filter(|path| {
                let full = resolve(&self.workspace_root, path);
                full.exists() && OpenOptions::new().append(true).open(&full).is_err()
            })
            .cloned()
            .collect()
    }

    /// Targets whose parent directory cannot be written
    fn check_write_permissions(&self, file_snapshots: &FileSnapshots) -> Vec<String> {
        file_snapshots
            .keys()
            .filter(|path| {
                let full = resolve(&self.workspace_root, path);
                !parent_writable(&full)
            })
            .cloned()
            .collect()
    }

    /// Working-tree status, or `None` when the workspace is not a git repository
    fn vcs_status(&self) -> Option<VcsStatus> {
        let repo = Repository::open(&self.workspace_root).ok()?;

        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);

        let statuses = match repo.statuses(Some(&mut opts)) {
            Ok(statuses) => statuses,
            Err(e) => {
                warn!(error = %e, "Could not read git status");
                return None;
            }
        };

        let mut status = VcsStatus::default();
        for entry in statuses.iter() {
            let path = entry.path().unwrap_or("");
            if self.is_engine_path(Path::new(path)) {
                continue;
            }

            let s = entry.status();
            status.total_changes += 1;
            if s.is_wt_new() {
                status.untracked_count += 1;
            } else if s.is_wt_modified() || s.is_index_modified() {
                status.modified_count += 1;
            }
        }

        Some(status)
    }

    fn is_engine_path(&self, path: &Path) -> bool {
        self.engine_paths.iter().any(|engine| path.starts_with(engine))
    }
}

/// Whether a file could be created or replaced at `path`.
///
/// Missing parents are created during restoration, so the nearest existing
/// ancestor is what has to be a writable directory.
fn parent_writable(path: &Path) -> bool {
    let mut dir = path.parent();
    while let Some(candidate) = dir {
        let existing = if candidate.as_os_str().is_empty() {
            Path::new(".")
        } else {
            candidate
        };
        match fs::metadata(existing) {
            Ok(meta) => return meta.is_dir() && can_write(existing, &meta),
            Err(_) => dir = candidate.parent(),
        }
    }
    false
}

/// Asks the kernel, so ownership, group bits and root's override all count.
#[cfg(unix)]
fn can_write(dir: &Path, _meta: &fs::Metadata) -> bool {
    use nix::unistd::{access, AccessFlags};
    access(dir, AccessFlags::W_OK).is_ok()
}

#[cfg(not(unix))]
fn can_write(_dir: &Path, meta: &fs::Metadata) -> bool {
    !meta.permissions().readonly()
}
