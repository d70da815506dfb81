//! Rewind - checkpoint restoration for agent workspaces
//!
//! Keeps a working directory in step with the checkpoints an external
//! reasoning process produces, without ever losing a user's edits:
//!
//! - **Validation**: pre-flight checks (permissions, locks, VCS state, size)
//! - **Synchronization**: restore with backup-before-overwrite, rollback, diff
//! - **Change detection**: a polling loop classifying INIT/FORWARD/ROLLBACK
//! - **State**: durable session pointer and append-only audit log
//!
//! # Quick Start
//!
//! ```ignore
//! use rewind::checkpoint::DirectorySource;
//! use rewind::config::Config;
//! use rewind::sync::{loop_control, SyncDaemon};
//!
//! let config = Config::load(None)?;
//! let source = DirectorySource::new(config.checkpoint_store());
//! let (handle, control) = loop_control();
//! SyncDaemon::new(source, &config).run(control).await?;
//! ```

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod errors;
pub mod fsutil;
pub mod observability;
pub mod state;
pub mod sync;
pub mod validation;

pub use checkpoint::{Checkpoint, CheckpointId, CheckpointSource, FileSnapshots};
pub use config::Config;
pub use errors::RewindError;
