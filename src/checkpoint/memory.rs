use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{Checkpoint, CheckpointSource};
use crate::errors::SourceError;

/// In-process checkpoint source holding the latest checkpoint per session
#[derive(Debug, Default)]
pub struct MemorySource {
    latest: RwLock<HashMap<String, Checkpoint>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `checkpoint` the latest one for `session_id`
    pub fn publish(&self, session_id: impl Into<String>, checkpoint: Checkpoint) {
        let mut latest = self.latest.write().unwrap_or_else(|e| e.into_inner());
        latest.insert(session_id.into(), checkpoint);
    }

    /// Forget everything published for `session_id`
    pub fn clear(&self, session_id: &str) {
        let mut latest = self.latest.write().unwrap_or_else(|e| e.into_inner());
        latest.remove(session_id);
    }
}

#[async_trait]
impl CheckpointSource for MemorySource {
    async fn latest(&self, session_id: &str) -> Result<Option<Checkpoint>, SourceError> {
        let latest = self.latest.read().unwrap_or_else(|e| e.into_inner());
        Ok(latest.get(session_id).cloned())
    }
}
