//! Workspace synchronization
//!
//! - [`FileSynchronizer`]: restore, rollback and diff against one workspace
//! - [`SyncDaemon`]: the polling loop that drives restorations
//! - [`LoopControl`]: pause/stop token sampled between ticks

pub mod control;
pub mod daemon;
pub mod synchronizer;

pub use control::{loop_control, LoopControl, LoopHandle, LoopState};
pub use daemon::{classify, SyncDaemon, TickReport, TrackingState, Transition};
pub use synchronizer::{
    generate_backup_id, BackupMetadata, Conflict, DiffStatus, FileDiff, FileOutcome,
    FileSynchronizer, RestorationResult, RestoreStatus, RollbackResult,
};
