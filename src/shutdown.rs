// SPDX-License-Identifier: MIT
//! Shutdown signal shared between the supervisor, processor, and evaluator.
//!
//! A single binary event distinguishing "reload" (restart the processor
//! activation, keep the process alive) from "terminate" (stop everything).
//! The supervisor owns it; the processor and evaluator watch it.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// What the agent should do once signaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Tear down the current processor activation and start a new one.
    Reload,
    /// Stop the agent process.
    Terminate,
}

/// Cloneable handle to the shared shutdown state.
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<Option<ShutdownMode>>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Request shutdown. Idempotent per activation: once a mode has been
    /// accepted, later requests of any kind are ignored until [`clear`]
    /// resets the flag. Returns whether this request was the accepted one.
    ///
    /// [`clear`]: Self::clear
    pub fn request(&self, mode: ShutdownMode) -> bool {
        let accepted = self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(mode);
            true
        });
        if !accepted {
            debug!(?mode, "shutdown already signaled — request ignored");
        }
        accepted
    }

    /// Reset the flag between supervisor iterations.
    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    /// The currently accepted mode, if any.
    pub fn current(&self) -> Option<ShutdownMode> {
        *self.tx.borrow()
    }

    pub fn is_signaled(&self) -> bool {
        self.current().is_some()
    }

    /// Wait until a shutdown mode has been accepted and return it.
    pub async fn signaled(&self) -> ShutdownMode {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(mode) = *rx.borrow_and_update() {
                return mode;
            }
            if rx.changed().await.is_err() {
                // Sender dropped — cannot happen while we hold the Arc, but
                // terminating is the only sane answer if it ever does.
                return ShutdownMode::Terminate;
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
