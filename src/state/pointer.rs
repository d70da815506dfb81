use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::checkpoint::CheckpointId;
use crate::errors::StateError;
use crate::fsutil::atomic_write;

/// Which checkpoint the workspace is believed to reflect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPointer {
    pub session_id: String,
    pub checkpoint_id: CheckpointId,
    /// Step of `checkpoint_id`; absent in pointers written by older tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<i64>,
    pub last_updated: DateTime<Utc>,
}

impl SessionPointer {
    pub fn new(
        session_id: impl Into<String>,
        checkpoint_id: CheckpointId,
        step_index: Option<i64>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            checkpoint_id,
            step_index,
            last_updated: Utc::now(),
        }
    }
}

/// Durable storage for the session pointer.
///
/// The pointer is only ever overwritten as a whole (temp file + rename),
/// and never deleted here.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the pointer; `Ok(None)` when none has been committed yet
    pub fn load(&self) -> Result<Option<SessionPointer>, StateError> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StateError::PointerRead {
                    path: self.path.clone(),
                    message: e.to_string(),
                })
            }
        };

        serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| StateError::PointerRead {
                path: self.path.clone(),
                message: e.to_string(),
            })
    }

    /// Atomically replace the stored pointer
    pub fn commit(&self, pointer: &SessionPointer) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(pointer).map_err(|e| StateError::PointerWrite {
            path: self.path.clone(),
            message: e.to_string(),
        })?;

        atomic_write(&self.path, json.as_bytes()).map_err(|e| StateError::PointerWrite {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }
}
