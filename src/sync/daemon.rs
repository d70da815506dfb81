//! Change-Detection Loop
//!
//! Polls a [`CheckpointSource`] on a fixed interval and, whenever the latest
//! checkpoint of the tracked session differs from the one recorded in the
//! session pointer, validates and restores it. Per tick:
//!
//! 1. query the source (absent or failing source = nothing to do)
//! 2. classify against the stored pointer: NONE, INIT, ROLLBACK or FORWARD
//! 3. validate, restore with a fresh backup id
//! 4. commit the pointer, then append an audit record
//!
//! Ticks never overlap. The pointer is committed only after the restoration
//! returned, so a crash mid-restore leaves it at the previous checkpoint.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn, Instrument};

use super::control::{LoopControl, LoopState};
use super::synchronizer::{generate_backup_id, FileSynchronizer, RestorationResult};
use crate::checkpoint::{Checkpoint, CheckpointId, CheckpointSource, FileSnapshots};
use crate::config::Config;
use crate::errors::{RewindError, SyncError};
use crate::observability::telemetry::{enter_tick, record_state_transition, sanitize_for_log};
use crate::state::{AuditLog, AuditRecord, SessionPointer, SessionStore};
use crate::validation::{RestorationValidator, ValidationReport};

/// Whether the loop has ever committed a pointer for its session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    Uninitialized,
    Tracking,
}

impl TrackingState {
    fn as_str(self) -> &'static str {
        match self {
            TrackingState::Uninitialized => "uninitialized",
            TrackingState::Tracking => "tracking",
        }
    }
}

/// Per-tick classification of the latest checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Transition {
    None,
    Init,
    Rollback,
    Forward,
}

impl Transition {
    pub fn label(self) -> &'static str {
        match self {
            Transition::None => "NONE",
            Transition::Init => "INIT",
            Transition::Rollback => "ROLLBACK",
            Transition::Forward => "FORWARD",
        }
    }

    pub fn requires_restore(self) -> bool {
        self != Transition::None
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Classify `latest` against the last committed pointer.
///
/// Ordering uses `step_index` only; checkpoint ids are compared for
/// equality and nothing else. A pointer without a step index, or one
/// written for another session, cannot be ordered against.
pub fn classify(
    previous: Option<&SessionPointer>,
    session_id: &str,
    latest: &Checkpoint,
) -> Transition {
    let Some(previous) = previous else {
        return Transition::Init;
    };
    if previous.session_id != session_id {
        return Transition::Init;
    }
    if previous.checkpoint_id == latest.checkpoint_id {
        return Transition::None;
    }
    match previous.step_index {
        Some(step) if latest.step_index < step => Transition::Rollback,
        _ => Transition::Forward,
    }
}

/// What one tick did
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub session_id: String,
    pub transition: Transition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<CheckpointId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restoration: Option<RestorationResult>,
    /// Set when the validator refused the restoration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<ValidationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl TickReport {
    fn idle(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            transition: Transition::None,
            checkpoint_id: None,
            restoration: None,
            blocked: None,
            note: None,
        }
    }

    fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn restored(&self) -> bool {
        self.restoration.is_some()
    }
}

fn resumed_session(store: &SessionStore) -> Option<String> {
    match store.load() {
        Ok(Some(pointer)) => {
            info!(session = %sanitize_for_log(&pointer.session_id), "Resuming session from pointer");
            Some(pointer.session_id)
        }
        Ok(None) => None,
        Err(e) => {
            warn!(error = %e, "Unreadable session pointer, using the default session");
            None
        }
    }
}

/// Keeps one workspace in step with the latest checkpoint of one session
pub struct SyncDaemon<S> {
    source: S,
    session_id: String,
    validator: RestorationValidator,
    synchronizer: FileSynchronizer,
    store: SessionStore,
    audit: AuditLog,
    poll_interval: Duration,
    block_on_warnings: bool,
    state: TrackingState,
    ticks: u64,
}

impl<S: CheckpointSource> SyncDaemon<S> {
    /// Tracks the pinned session if one is configured, otherwise the session
    /// recorded in the stored pointer, otherwise `sync.default_session`.
    pub fn new(source: S, config: &Config) -> Self {
        let store = SessionStore::new(config.session_file());
        let session_id = match &config.sync.session {
            Some(pinned) => pinned.clone(),
            None => resumed_session(&store).unwrap_or_else(|| config.sync.default_session.clone()),
        };
        Self {
            source,
            session_id,
            validator: RestorationValidator::from_config(config),
            synchronizer: FileSynchronizer::new(&config.workspace, &config.storage.backup_dir),
            store,
            audit: AuditLog::new(config.audit_log()),
            poll_interval: config.poll_interval(),
            block_on_warnings: config.sync.block_on_warnings,
            state: TrackingState::Uninitialized,
            ticks: 0,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn synchronizer(&self) -> &FileSynchronizer {
        &self.synchronizer
    }

    fn set_state(&mut self, next: TrackingState) {
        if self.state != next {
            record_state_transition(self.state.as_str(), next.as_str());
            self.state = next;
        }
    }

    /// Run one poll/classify/restore cycle
    pub async fn tick(&mut self) -> Result<TickReport, RewindError> {
        self.ticks += 1;
        let span = enter_tick(&self.session_id, self.ticks);
        self.tick_inner().instrument(span).await
    }

    async fn tick_inner(&mut self) -> Result<TickReport, RewindError> {
        let latest = match self.source.latest(&self.session_id).await {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => {
                debug!("No checkpoint available");
                return Ok(TickReport::idle(&self.session_id));
            }
            Err(e) => {
                warn!(error = %e, "Checkpoint source unavailable, skipping tick");
                return Ok(TickReport::idle(&self.session_id).with_note(e.to_string()));
            }
        };

        let previous = match self.store.load() {
            Ok(pointer) => pointer,
            Err(e) => {
                warn!(error = %e, "Unreadable session pointer, treating workspace as uninitialized");
                None
            }
        };
        if previous
            .as_ref()
            .is_some_and(|p| p.session_id == self.session_id)
        {
            self.set_state(TrackingState::Tracking);
        }

        let transition = classify(previous.as_ref(), &self.session_id, &latest);
        if !transition.requires_restore() {
            return Ok(TickReport::idle(&self.session_id));
        }

        info!(
            transition = transition.label(),
            checkpoint = %sanitize_for_log(latest.checkpoint_id.as_str()),
            step = latest.step_index,
            files = latest.file_snapshots.len(),
            "Checkpoint change detected"
        );

        let Checkpoint {
            checkpoint_id,
            step_index,
            file_snapshots,
        } = latest;
        let snapshots = Arc::new(file_snapshots);

        let report = self.validate(&checkpoint_id, Arc::clone(&snapshots)).await?;
        if !report.valid || (self.block_on_warnings && report.requires_confirmation) {
            return Ok(self.refuse(transition, checkpoint_id, report));
        }
        for warning in &report.warnings {
            warn!(warning = %warning, "Proceeding despite validation warning");
        }

        let backup_id = generate_backup_id();
        let result = self.restore(snapshots, backup_id).await?;

        let pointer = SessionPointer::new(&self.session_id, checkpoint_id.clone(), Some(step_index));
        self.store.commit(&pointer)?;
        self.set_state(TrackingState::Tracking);

        let record = AuditRecord::new(transition.label(), &self.session_id, checkpoint_id.as_str())
            .with_backup(&result.backup_id)
            .with_files_updated(result.files_restored.clone())
            .with_conflicts(result.conflicts.len())
            .with_failures(result.failed_paths());
        let mut tick = TickReport {
            session_id: self.session_id.clone(),
            transition,
            checkpoint_id: Some(checkpoint_id),
            restoration: Some(result),
            blocked: None,
            note: None,
        };
        if let Err(e) = self.audit.append(&record) {
            // The workspace and pointer already moved on; a missing record is not fatal.
            warn!(error = %e, "Failed to write audit record");
            tick.note = Some(e.to_string());
        }
        Ok(tick)
    }

    async fn validate(
        &self,
        checkpoint_id: &CheckpointId,
        snapshots: Arc<FileSnapshots>,
    ) -> Result<ValidationReport, RewindError> {
        let validator = self.validator.clone();
        let id = checkpoint_id.clone();
        tokio::task::spawn_blocking(move || validator.validate(&id, &snapshots))
            .await
            .map_err(|e| SyncError::Aborted(e.to_string()).into())
    }

    async fn restore(
        &self,
        snapshots: Arc<FileSnapshots>,
        backup_id: String,
    ) -> Result<RestorationResult, RewindError> {
        let synchronizer = self.synchronizer.clone();
        let result = tokio::task::spawn_blocking(move || synchronizer.restore(&snapshots, &backup_id))
            .await
            .map_err(|e| SyncError::Aborted(e.to_string()))??;
        Ok(result)
    }

    fn refuse(
        &self,
        transition: Transition,
        checkpoint_id: CheckpointId,
        report: ValidationReport,
    ) -> TickReport {
        let reasons = if report.valid {
            report.warnings.join("; ")
        } else {
            report.errors.join("; ")
        };
        warn!(
            transition = transition.label(),
            reasons = %reasons,
            "Restoration blocked by validator"
        );

        let record = AuditRecord::new("BLOCKED", &self.session_id, checkpoint_id.as_str())
            .with_note(format!("{}: {}", transition.label(), reasons));
        if let Err(e) = self.audit.append(&record) {
            warn!(error = %e, "Failed to write audit record");
        }

        TickReport {
            session_id: self.session_id.clone(),
            transition,
            checkpoint_id: Some(checkpoint_id),
            restoration: None,
            blocked: Some(report),
            note: Some(reasons),
        }
    }

    /// Tick until `control` says stop.
    ///
    /// Pause and stop are only honoured between ticks; a tick in progress
    /// always finishes.
    pub async fn run(&mut self, mut control: LoopControl) -> Result<(), RewindError> {
        info!(
            session = %sanitize_for_log(&self.session_id),
            interval_ms = self.poll_interval.as_millis() as u64,
            "Sync loop started"
        );

        let period = self.poll_interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                state = control.changed() => {
                    if state == LoopState::Stopped {
                        break;
                    }
                    continue;
                }
            }

            match control.state() {
                LoopState::Stopped => break,
                LoopState::Paused => {
                    info!("Sync loop paused");
                    if !control.wait_until_running().await {
                        break;
                    }
                    info!("Sync loop resumed");
                    interval.reset();
                    continue;
                }
                LoopState::Running => {}
            }

            if let Err(e) = self.tick().await {
                warn!(error = %e, "Tick failed, retrying at next interval");
            }
        }

        info!(ticks = self.ticks, "Sync loop stopped");
        Ok(())
    }
}
