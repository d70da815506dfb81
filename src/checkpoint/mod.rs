//! Checkpoint Records & Sources
//!
//! A checkpoint is the immutable record the restoration engine consumes:
//! an opaque ordered id, the reasoning step it belongs to, and the full
//! text of every file captured at that step.
//!
//! The engine never talks to the producer of checkpoints directly. It polls
//! a [`CheckpointSource`] for the latest checkpoint of a session:
//! - [`MemorySource`] for in-process producers and tests
//! - [`DirectorySource`] for checkpoints dropped as JSON files on disk

mod directory;
mod memory;

pub use directory::DirectorySource;
pub use memory::MemorySource;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::errors::SourceError;

/// Mapping of file path (workspace-relative or absolute) to full text content.
pub type FileSnapshots = BTreeMap<String, String>;

/// Opaque checkpoint token.
///
/// Only equality is meaningful to the engine. Ordering between tokens
/// belongs to the source that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CheckpointId(String);

impl CheckpointId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CheckpointId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CheckpointId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// Producers write ids either as strings or as bare integers.
impl<'de> Deserialize<'de> for CheckpointId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Unsigned(u64),
            Signed(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Self(s),
            Raw::Unsigned(n) => Self(n.to_string()),
            Raw::Signed(n) => Self(n.to_string()),
        })
    }
}

/// A captured workspace state tied to one reasoning step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: CheckpointId,
    pub step_index: i64,
    #[serde(default)]
    pub file_snapshots: FileSnapshots,
}

impl Checkpoint {
    pub fn new(checkpoint_id: impl Into<CheckpointId>, step_index: i64) -> Self {
        Self {
            checkpoint_id: checkpoint_id.into(),
            step_index,
            file_snapshots: FileSnapshots::new(),
        }
    }

    /// Add a file snapshot
    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.file_snapshots.insert(path.into(), content.into());
        self
    }

    /// Total bytes of snapshot content
    pub fn total_size(&self) -> usize {
        self.file_snapshots.values().map(String::len).sum()
    }
}

/// Read side of a checkpoint store. Polled, never pushed to.
#[async_trait]
pub trait CheckpointSource: Send + Sync {
    /// Latest checkpoint of `session_id`, or `None` when the session has none yet.
    async fn latest(&self, session_id: &str) -> Result<Option<Checkpoint>, SourceError>;
}

#[async_trait]
impl<S: CheckpointSource + ?Sized> CheckpointSource for Arc<S> {
    async fn latest(&self, session_id: &str) -> Result<Option<Checkpoint>, SourceError> {
        (**self).latest(session_id).await
    }
}
