use async_trait::async_trait;
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{Checkpoint, CheckpointId, CheckpointSource};
use crate::errors::SourceError;
use crate::fsutil::atomic_write;
use crate::observability::telemetry::sanitize_for_log;

/// Checkpoint source backed by a directory of JSON files.
///
/// Layout: `<root>/<session_id>/<anything>.json`, one serialized
/// [`Checkpoint`] per file. The latest checkpoint is the one with the
/// greatest id under [`DirectorySource::token_order`].
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// This source's ordering of checkpoint tokens.
    ///
    /// Purely numeric tokens compare numerically, anything else compares
    /// lexicographically (time-ordered ids such as UUIDv6/v7 sort correctly).
    pub fn token_order(a: &CheckpointId, b: &CheckpointId) -> Ordering {
        match (a.as_str().parse::<u64>(), b.as_str().parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => a.as_str().cmp(b.as_str()),
        }
    }

    fn session_dir(&self, session_id: &str) -> Result<PathBuf, SourceError> {
        if session_id.is_empty()
            || session_id == "."
            || session_id == ".."
            || session_id.contains(&['/', '\\'][..])
        {
            return Err(SourceError::Unavailable(format!(
                "invalid session id '{}'",
                sanitize_for_log(session_id)
            )));
        }
        Ok(self.root.join(session_id))
    }

    /// Write `checkpoint` into the store for `session_id`.
    ///
    /// Producers that share a filesystem with the engine use this to hand
    /// checkpoints over; the write is atomic so a poll never sees half a file.
    pub fn publish(
        &self,
        session_id: &str,
        checkpoint: &Checkpoint,
    ) -> Result<PathBuf, SourceError> {
        let dir = self.session_dir(session_id)?;
        let file_name: String = checkpoint
            .checkpoint_id
            .as_str()
            .chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
                _ => '_',
            })
            .collect();
        let path = dir.join(format!("{}.json", file_name));

        let json = serde_json::to_vec_pretty(checkpoint).map_err(|e| SourceError::Malformed {
            path: path.clone(),
            message: e.to_string(),
        })?;
        atomic_write(&path, &json).map_err(|e| {
            SourceError::Unavailable(format!("failed to write {}: {}", path.display(), e))
        })?;
        Ok(path)
    }

    fn scan_latest(dir: &Path) -> Result<Option<Checkpoint>, SourceError> {
        if !dir.exists() {
            return Ok(None);
        }

        let entries = fs::read_dir(dir).map_err(|e| {
            SourceError::Unavailable(format!("failed to list {}: {}", dir.display(), e))
        })?;

        let mut latest: Option<Checkpoint> = None;
        for entry in entries {
            let entry = entry.map_err(|e| SourceError::Unavailable(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }

            let checkpoint = match read_checkpoint(&path) {
                Ok(cp) => cp,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable checkpoint file");
                    continue;
                }
            };

            let newer = latest.as_ref().map_or(true, |current| {
                Self::token_order(&checkpoint.checkpoint_id, &current.checkpoint_id)
                    == Ordering::Greater
            });
            if newer {
                latest = Some(checkpoint);
            }
        }

        Ok(latest)
    }
}

fn read_checkpoint(path: &Path) -> Result<Checkpoint, SourceError> {
    let json = fs::read_to_string(path).map_err(|e| SourceError::Malformed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    serde_json::from_str(&json).map_err(|e| SourceError::Malformed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

#[async_trait]
impl CheckpointSource for DirectorySource {
    async fn latest(&self, session_id: &str) -> Result<Option<Checkpoint>, SourceError> {
        let dir = self.session_dir(session_id)?;
        debug!(dir = %dir.display(), "Scanning checkpoint store");

        tokio::task::spawn_blocking(move || Self::scan_latest(&dir))
            .await
            .map_err(|e| SourceError::Unavailable(format!("checkpoint scan aborted: {}", e)))?
    }
}
