//! File Synchronizer
//!
//! Writes checkpoint snapshots back into the workspace. Before a file is
//! overwritten, its current content is compared with the snapshot; when they
//! differ the live file is copied verbatim into the restoration's backup set
//! and the difference is recorded as a conflict with a unified diff.
//!
//! Backup layout:
//! ```text
//! <backup_root>/<backup_id>/.rewind-metadata.json
//! <backup_root>/<backup_id>/files/<relative/path/of/file>
//! ```
//!
//! Processing is best-effort per file: one unreadable or unwritable path is
//! reported in the result and the remaining paths are still restored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use similar::TextDiff;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::checkpoint::FileSnapshots;
use crate::errors::SyncError;
use crate::fsutil::{atomic_write, lexical_normalize, normalize_relative, resolve};
use crate::observability::telemetry::{record_restoration, sanitize_for_log};

/// Name of the sidecar record inside every backup set
pub const METADATA_FILE: &str = ".rewind-metadata.json";

/// Subdirectory of a backup set holding the copied files, apart from the sidecar
pub const FILES_DIR: &str = "files";

/// Generate a fresh, unique backup id
pub fn generate_backup_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "restore-{}-{}",
        Utc::now().format("%Y%m%dT%H%M%S"),
        &suffix[..8]
    )
}

/// A target whose on-disk content differed from its snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub file: String,
    /// Unified diff, old side = snapshot, new side = current file
    pub diff: String,
    pub snapshot_line_count: usize,
    pub current_line_count: usize,
}

/// What happened to one target path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Restored { path: String, backed_up: bool },
    Failed { path: String, error: String },
}

impl FileOutcome {
    pub fn path(&self) -> &str {
        match self {
            FileOutcome::Restored { path, .. } | FileOutcome::Failed { path, .. } => path,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, FileOutcome::Failed { .. })
    }
}

/// Aggregate verdict derived from the per-file outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStatus {
    Complete,
    Partial,
    Failed,
}

/// Returned once per `restore` call; never persisted by the synchronizer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestorationResult {
    pub backup_id: String,
    pub files_restored: Vec<String>,
    pub files_backed_up: Vec<String>,
    pub conflicts: Vec<Conflict>,
    pub backup_path: PathBuf,
    pub outcomes: Vec<FileOutcome>,
}

impl RestorationResult {
    pub fn status(&self) -> RestoreStatus {
        let failed = self.failures().count();
        if failed == 0 {
            RestoreStatus::Complete
        } else if failed == self.outcomes.len() {
            RestoreStatus::Failed
        } else {
            RestoreStatus::Partial
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes.iter().filter(|o| o.is_failure())
    }

    pub fn failed_paths(&self) -> Vec<String> {
        self.failures().map(|o| o.path().to_string()).collect()
    }
}

/// Self-describing sidecar of a backup set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub backup_id: String,
    pub timestamp: DateTime<Utc>,
    pub files_restored: Vec<String>,
    #[serde(alias = "conflicts")]
    pub conflict_count: usize,
    /// Backup-relative key → snapshot path the entry belongs to
    #[serde(default)]
    pub entries: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackResult {
    pub success: bool,
    pub backup_id: String,
    pub files_restored: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FileOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RollbackResult {
    fn failed(backup_id: &str, error: String) -> Self {
        Self {
            success: false,
            backup_id: backup_id.to_string(),
            files_restored: Vec::new(),
            failures: Vec::new(),
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffStatus {
    Unchanged,
    Modified,
    Deleted,
    Error,
}

/// Read-only preview of what restoring one file would change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub file: String,
    pub status: DiffStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines_added: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines_removed: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileDiff {
    fn bare(file: &str, status: DiffStatus) -> Self {
        Self {
            file: file.to_string(),
            status,
            diff: None,
            lines_added: None,
            lines_removed: None,
            error: None,
        }
    }
}

/// Unified line diff between the checkpointed and the current content
pub fn unified_diff(snapshot: &str, current: &str, file: &str) -> String {
    let old_label = format!("{} (checkpoint)", file);
    let new_label = format!("{} (current)", file);
    let diff = TextDiff::from_lines(snapshot, current);
    let rendered = diff
        .unified_diff()
        .context_radius(3)
        .header(&old_label, &new_label)
        .to_string();
    rendered
}

/// Count `+` and `-` lines of a unified diff, ignoring its two header lines
pub fn count_changed_lines(diff: &str) -> (usize, usize) {
    let mut added = 0;
    let mut removed = 0;
    let mut lines = diff.lines().peekable();

    if lines.peek().is_some_and(|l| l.starts_with("--- ")) {
        lines.next();
        if lines.peek().is_some_and(|l| l.starts_with("+++ ")) {
            lines.next();
        }
    }

    for line in lines {
        if line.starts_with('+') {
            added += 1;
        } else if line.starts_with('-') {
            removed += 1;
        }
    }
    (added, removed)
}

/// Restores snapshots into one workspace, with per-restoration backups
#[derive(Debug, Clone)]
pub struct FileSynchronizer {
    workspace_root: PathBuf,
    workspace_abs: PathBuf,
    backup_root: PathBuf,
}

impl FileSynchronizer {
    /// `backup_root` is resolved against the workspace unless absolute
    pub fn new(workspace_root: impl Into<PathBuf>, backup_root: impl AsRef<Path>) -> Self {
        let workspace_root = workspace_root.into();
        let workspace_abs = std::path::absolute(&workspace_root)
            .map(|p| lexical_normalize(&p))
            .unwrap_or_else(|_| workspace_root.clone());
        let backup_root = workspace_root.join(backup_root.as_ref());
        Self {
            workspace_root,
            workspace_abs,
            backup_root,
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    pub fn backup_path(&self, backup_id: &str) -> PathBuf {
        self.backup_root.join(backup_id)
    }

    /// Where the copy of a backed-up file with the given key lives
    pub fn backup_file_path(&self, backup_id: &str, key: impl AsRef<Path>) -> PathBuf {
        self.backup_path(backup_id).join(FILES_DIR).join(key)
    }

    /// Where inside a backup set the pre-restoration copy of `snapshot_path` lives.
    ///
    /// Paths inside the workspace keep their workspace-relative layout; absolute
    /// paths outside it are stored under their root-stripped path.
    fn backup_key(&self, snapshot_path: &str) -> Option<PathBuf> {
        let absolute = lexical_normalize(&self.workspace_abs.join(snapshot_path));
        match absolute.strip_prefix(&self.workspace_abs) {
            Ok(rel) => normalize_relative(rel),
            Err(_) => normalize_relative(&absolute),
        }
    }

    /// Restore every snapshot, backing up conflicting files first
    pub fn restore(
        &self,
        file_snapshots: &FileSnapshots,
        backup_id: &str,
    ) -> Result<RestorationResult, SyncError> {
        validate_backup_id(backup_id)?;

        let backup_path = self.backup_path(backup_id);
        if backup_path.exists() {
            return Err(SyncError::BackupExists(backup_id.to_string()));
        }
        fs::create_dir_all(&backup_path).map_err(|e| SyncError::BackupDir {
            path: backup_path.clone(),
            message: e.to_string(),
        })?;

        let mut result = RestorationResult {
            backup_id: backup_id.to_string(),
            files_restored: Vec::new(),
            files_backed_up: Vec::new(),
            conflicts: Vec::new(),
            backup_path: backup_path.clone(),
            outcomes: Vec::with_capacity(file_snapshots.len()),
        };
        let mut entries = BTreeMap::new();

        for (path, snapshot) in file_snapshots {
            let outcome = self.restore_one(path, snapshot, &backup_path, &mut result, &mut entries);
            if let FileOutcome::Failed { ref error, .. } = outcome {
                warn!(path = %sanitize_for_log(path), error = %error, "Failed to restore file");
            } else {
                result.files_restored.push(path.clone());
            }
            result.outcomes.push(outcome);
        }

        let metadata = BackupMetadata {
            backup_id: backup_id.to_string(),
            timestamp: Utc::now(),
            files_restored: result.files_restored.clone(),
            conflict_count: result.conflicts.len(),
            entries,
        };
        write_metadata(&backup_path, &metadata)?;

        record_restoration(
            backup_id,
            result.files_restored.len(),
            result.conflicts.len(),
            result.failures().count(),
        );
        Ok(result)
    }

    /// Read, diff, back up and write one path, strictly in that order
    fn restore_one(
        &self,
        path: &str,
        snapshot: &str,
        backup_path: &Path,
        result: &mut RestorationResult,
        entries: &mut BTreeMap<String, String>,
    ) -> FileOutcome {
        let target = resolve(&self.workspace_root, path);
        let failed = |error: String| FileOutcome::Failed {
            path: path.to_string(),
            error,
        };

        let mut backed_up = false;
        match fs::read(&target) {
            Ok(current) if current != snapshot.as_bytes() => {
                let Some(key) = self.backup_key(path) else {
                    return failed("cannot derive a backup location for this path".to_string());
                };

                let current_text = String::from_utf8_lossy(&current);
                let conflict = Conflict {
                    file: path.to_string(),
                    diff: unified_diff(snapshot, &current_text, path),
                    snapshot_line_count: snapshot.lines().count(),
                    current_line_count: current_text.lines().count(),
                };

                let backup_file = backup_path.join(FILES_DIR).join(&key);
                if let Err(e) = copy_verbatim(&target, &backup_file) {
                    // Never overwrite what could not be preserved.
                    return failed(format!("backup failed: {}", e));
                }

                info!(path = %sanitize_for_log(path), "Conflict detected, current version backed up");
                entries.insert(key_string(&key), path.to_string());
                result.conflicts.push(conflict);
                result.files_backed_up.push(path.to_string());
                backed_up = true;
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return failed(format!("could not read current content: {}", e)),
        }

        match atomic_write(&target, snapshot.as_bytes()) {
            Ok(()) => {
                debug!(path = %sanitize_for_log(path), "Restored");
                FileOutcome::Restored {
                    path: path.to_string(),
                    backed_up,
                }
            }
            Err(e) => failed(format!("write failed: {}", e)),
        }
    }

    /// Copy every entry of a backup set back over the workspace.
    ///
    /// Unconditional overwrite; the live content is not compared first.
    pub fn rollback(&self, backup_id: &str) -> RollbackResult {
        if let Err(e) = validate_backup_id(backup_id) {
            return RollbackResult::failed(backup_id, e.to_string());
        }

        let backup_path = self.backup_path(backup_id);
        if !backup_path.is_dir() {
            return RollbackResult::failed(backup_id, format!("Backup {} not found", backup_id));
        }

        let entries = read_metadata(&backup_path)
            .map(|m| m.entries)
            .unwrap_or_default();

        let mut result = RollbackResult {
            success: true,
            backup_id: backup_id.to_string(),
            files_restored: Vec::new(),
            failures: Vec::new(),
            error: None,
        };

        // A restoration without conflicts never creates the files directory.
        let files_path = backup_path.join(FILES_DIR);
        let walk = files_path
            .is_dir()
            .then(|| WalkDir::new(&files_path).min_depth(1).sort_by_file_name());

        for entry in walk.into_iter().flatten().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }

            let Ok(rel) = entry.path().strip_prefix(&files_path) else {
                continue;
            };
            let key = key_string(rel);
            let target = match entries.get(&key) {
                Some(original) => resolve(&self.workspace_root, original),
                None => self.workspace_root.join(rel),
            };

            let copied = fs::read(entry.path()).and_then(|bytes| atomic_write(&target, &bytes));
            match copied {
                Ok(()) => result.files_restored.push(key),
                Err(e) => {
                    warn!(path = %sanitize_for_log(&key), error = %e, "Failed to roll back file");
                    result.failures.push(FileOutcome::Failed {
                        path: key,
                        error: e.to_string(),
                    });
                }
            }
        }

        if !result.failures.is_empty() {
            result.success = false;
            result.error = Some(format!(
                "{} of {} files could not be rolled back",
                result.failures.len(),
                result.failures.len() + result.files_restored.len()
            ));
        }

        info!(
            backup_id = %sanitize_for_log(backup_id),
            files = result.files_restored.len(),
            failed = result.failures.len(),
            "Rollback completed"
        );
        result
    }

    /// Preview the difference between a snapshot and the live file
    pub fn diff(&self, path: &str, snapshot_content: &str) -> FileDiff {
        let target = resolve(&self.workspace_root, path);

        let current = match fs::read(&target) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return FileDiff::bare(path, DiffStatus::Deleted)
            }
            Err(e) => {
                let mut diff = FileDiff::bare(path, DiffStatus::Error);
                diff.error = Some(e.to_string());
                return diff;
            }
        };

        if current == snapshot_content.as_bytes() {
            return FileDiff::bare(path, DiffStatus::Unchanged);
        }

        let text = unified_diff(snapshot_content, &String::from_utf8_lossy(&current), path);
        let (added, removed) = count_changed_lines(&text);
        FileDiff {
            file: path.to_string(),
            status: DiffStatus::Modified,
            diff: Some(text),
            lines_added: Some(added),
            lines_removed: Some(removed),
            error: None,
        }
    }

    /// Metadata of every backup set, newest first
    pub fn list_backups(&self) -> Vec<BackupMetadata> {
        let Ok(dir) = fs::read_dir(&self.backup_root) else {
            return Vec::new();
        };

        let mut backups: Vec<BackupMetadata> = dir
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| match read_metadata(&e.path()) {
                Ok(meta) => Some(meta),
                Err(err) => {
                    debug!(path = %e.path().display(), error = %err, "Skipping backup without metadata");
                    None
                }
            })
            .collect();

        backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        backups
    }
}

/// A backup id names exactly one directory under the backup root
fn validate_backup_id(backup_id: &str) -> Result<(), SyncError> {
    let mut components = Path::new(backup_id).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !backup_id.contains(&['/', '\\'][..]) => Ok(()),
        _ => Err(SyncError::InvalidBackupId(sanitize_for_log(backup_id))),
    }
}

/// Portable string form of a backup key
fn key_string(key: &Path) -> String {
    key.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn copy_verbatim(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(from, to).map(|_| ())
}

fn write_metadata(backup_path: &Path, metadata: &BackupMetadata) -> Result<(), SyncError> {
    let to_err = |message: String| SyncError::Metadata {
        backup_id: metadata.backup_id.clone(),
        message,
    };
    let json = serde_json::to_string_pretty(metadata).map_err(|e| to_err(e.to_string()))?;
    atomic_write(&backup_path.join(METADATA_FILE), json.as_bytes()).map_err(|e| to_err(e.to_string()))
}

fn read_metadata(backup_path: &Path) -> anyhow::Result<BackupMetadata> {
    let json = fs::read_to_string(backup_path.join(METADATA_FILE))?;
    Ok(serde_json::from_str(&json)?)
}
