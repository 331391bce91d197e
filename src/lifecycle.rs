//! Engine lifecycle state and cooperative shutdown.
//!
//! A [`ShutdownTrigger`] / [`ShutdownSignal`] pair replaces a process-wide
//! stop flag: the engine keeps the trigger, the worker task gets the signal
//! and checks it between poll or tick iterations.

use std::fmt;

use serde::Serialize;
use tokio::sync::watch;

use crate::error::{BagError, Result};

/// Engine lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    /// Created or initialized, worker not started.
    Initial,
    /// Worker running.
    Running,
    /// Stop requested, waiting for the worker to join.
    Stopping,
    /// Terminal.
    Stopped,
}

impl EngineState {
    /// Fail with `InvalidState` unless the state is `expected`.
    pub fn ensure(self, expected: EngineState, operation: &str) -> Result<()> {
        if self == expected {
            Ok(())
        } else {
            Err(BagError::InvalidState(format!(
                "cannot {} while {} (expected {})",
                operation, self, expected
            )))
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Initial => write!(f, "initial"),
            EngineState::Running => write!(f, "running"),
            EngineState::Stopping => write!(f, "stopping"),
            EngineState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Create a linked trigger and signal.
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

/// Sending half of a shutdown token.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Check if shutdown was requested.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Create another signal linked to this trigger.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving half of a shutdown token. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Check if shutdown was requested.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is requested.
    ///
    /// Also resolves if the trigger is dropped, so an orphaned worker
    /// never waits forever.
    pub async fn triggered(&mut self) {
        // Err means the trigger is gone, which counts as shutdown.
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}
