use chrono::{DateTime, Utc};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::StateError;
use crate::observability::telemetry::sanitize_for_log;

const SEPARATOR_WIDTH: usize = 80;

/// One restoration attempt, as written to the audit log
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    /// Transition label: INIT, ROLLBACK, FORWARD, BLOCKED, ...
    pub event: String,
    pub session_id: String,
    pub checkpoint_id: String,
    pub backup_id: Option<String>,
    pub files_updated: Vec<String>,
    pub files_removed: Vec<String>,
    pub conflicts: usize,
    pub failures: Vec<String>,
    pub note: Option<String>,
}

impl AuditRecord {
    pub fn new(
        event: impl Into<String>,
        session_id: impl Into<String>,
        checkpoint_id: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            event: event.into(),
            session_id: session_id.into(),
            checkpoint_id: checkpoint_id.into(),
            backup_id: None,
            files_updated: Vec::new(),
            files_removed: Vec::new(),
            conflicts: 0,
            failures: Vec::new(),
            note: None,
        }
    }

    pub fn with_backup(mut self, backup_id: impl Into<String>) -> Self {
        self.backup_id = Some(backup_id.into());
        self
    }

    pub fn with_files_updated(mut self, files: Vec<String>) -> Self {
        self.files_updated = files;
        self
    }

    pub fn with_conflicts(mut self, conflicts: usize) -> Self {
        self.conflicts = conflicts;
        self
    }

    pub fn with_failures(mut self, failures: Vec<String>) -> Self {
        self.failures = failures;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[String]) -> fmt::Result {
    let escaped: Vec<String> = items.iter().map(|s| sanitize_for_log(s)).collect();
    write!(f, "[{}]", escaped.join(", "))
}

// Every field is escaped so a record always occupies exactly one block.
impl fmt::Display for AuditRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} - {} - Session: {}, Checkpoint: {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.event.to_uppercase(),
            sanitize_for_log(&self.session_id),
            sanitize_for_log(&self.checkpoint_id)
        )?;
        if let Some(ref backup_id) = self.backup_id {
            writeln!(f, "Backup: {}", sanitize_for_log(backup_id))?;
        }
        write!(f, "Files updated: ")?;
        write_list(f, &self.files_updated)?;
        write!(f, "\nFiles removed: ")?;
        write_list(f, &self.files_removed)?;
        writeln!(f, "\nConflicts: {}", self.conflicts)?;
        if !self.failures.is_empty() {
            write!(f, "Failures: ")?;
            write_list(f, &self.failures)?;
            writeln!(f)?;
        }
        if let Some(ref note) = self.note {
            writeln!(f, "Note: {}", sanitize_for_log(note))?;
        }
        writeln!(f, "{}", "=".repeat(SEPARATOR_WIDTH))
    }
}

/// Append-only text log of restoration events
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record block
    pub fn append(&self, record: &AuditRecord) -> Result<(), StateError> {
        let to_err = |e: std::io::Error| StateError::AuditWrite {
            path: self.path.clone(),
            message: e.to_string(),
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(to_err)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(to_err)?;

        // One write per block keeps concurrent appenders from interleaving lines.
        let block = format!("\n{}", record);
        file.write_all(block.as_bytes()).map_err(to_err)
    }
}
