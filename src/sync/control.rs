//! Cooperative pause/stop signalling for the change-detection loop.
//!
//! The loop samples the token only between ticks, so a restoration that has
//! started always runs to completion before a pause or stop takes effect.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Running,
    Paused,
    Stopped,
}

/// Sending half, held by whoever drives the loop (signal handler, CLI, tests)
#[derive(Debug, Clone)]
pub struct LoopHandle {
    tx: watch::Sender<LoopState>,
}

/// Receiving half, handed to the loop
#[derive(Debug, Clone)]
pub struct LoopControl {
    rx: watch::Receiver<LoopState>,
}

/// Create a connected handle/control pair, initially running
pub fn loop_control() -> (LoopHandle, LoopControl) {
    let (tx, rx) = watch::channel(LoopState::Running);
    (LoopHandle { tx }, LoopControl { rx })
}

impl LoopHandle {
    pub fn pause(&self) {
        self.set(LoopState::Paused);
    }

    pub fn resume(&self) {
        self.set(LoopState::Running);
    }

    pub fn stop(&self) {
        self.set(LoopState::Stopped);
    }

    pub fn state(&self) -> LoopState {
        *self.tx.borrow()
    }

    // Stopped is terminal.
    fn set(&self, next: LoopState) {
        self.tx.send_if_modified(|current| {
            if *current == LoopState::Stopped || *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

impl LoopControl {
    pub fn state(&self) -> LoopState {
        *self.rx.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == LoopState::Stopped
    }

    pub fn is_paused(&self) -> bool {
        self.state() == LoopState::Paused
    }

    /// Resolve on the next state change.
    ///
    /// A dropped handle counts as a stop.
    pub async fn changed(&mut self) -> LoopState {
        match self.rx.changed().await {
            Ok(()) => *self.rx.borrow_and_update(),
            Err(_) => LoopState::Stopped,
        }
    }

    /// Wait while paused; returns `false` once the loop should stop
    pub async fn wait_until_running(&mut self) -> bool {
        loop {
            match *self.rx.borrow_and_update() {
                LoopState::Running => return true,
                LoopState::Stopped => return false,
                LoopState::Paused => {}
            }
            if self.rx.changed().await.is_err() {
                return false;
            }
        }
    }
}
