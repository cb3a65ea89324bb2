//! Pause and stop signalling observed by workers at stage boundaries.

use std::sync::Arc;

use tokio::sync::watch;

/// Requested run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Running,
    Paused,
    /// Sticky: once stopping, the gate never reopens.
    Stopping,
}

/// Verdict of [`RunGate::checkpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Proceed,
    Stop,
}

/// Shared gate between the orchestrator and its workers.
#[derive(Debug, Clone)]
pub struct RunGate {
    tx: Arc<watch::Sender<GateState>>,
}

impl Default for RunGate {
    fn default() -> Self {
        Self::new()
    }
}

impl RunGate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(GateState::Running);
        Self { tx: Arc::new(tx) }
    }

    pub fn state(&self) -> GateState {
        *self.tx.borrow()
    }

    pub fn is_stopping(&self) -> bool {
        self.state() == GateState::Stopping
    }

    /// Close the gate. Returns `false` if it was not running.
    pub fn pause(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == GateState::Running {
                *state = GateState::Paused;
                true
            } else {
                false
            }
        })
    }

    /// Reopen a paused gate. Returns `false` if it was not paused.
    pub fn resume(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == GateState::Paused {
                *state = GateState::Running;
                true
            } else {
                false
            }
        })
    }

    /// Release every waiter with [`Checkpoint::Stop`].
    pub fn stop(&self) {
        self.tx.send_replace(GateState::Stopping);
    }

    /// Wait while paused; report whether the caller should continue.
    pub async fn checkpoint(&self) -> Checkpoint {
        let mut rx = self.tx.subscribe();
        loop {
            match *rx.borrow_and_update() {
                GateState::Running => return Checkpoint::Proceed,
                GateState::Stopping => return Checkpoint::Stop,
                GateState::Paused => {}
            }
            // The sender lives in `self`, so the channel cannot close here.
            if rx.changed().await.is_err() {
                return Checkpoint::Stop;
            }
        }
    }
}
