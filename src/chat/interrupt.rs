//! Per-turn cancellation.
//!
//! The Ctrl-C handler runs on its own thread and cannot know which turn is in flight.  It
//! calls [`Interrupter::interrupt`], which cancels the token of the current turn.  Each turn
//! (and each interruptible wait) arms a fresh token, so an interrupt never leaks into the next
//! turn.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

/// Hands out one cancellation token per turn and cancels the current one on request.
#[derive(Clone, Debug, Default)]
pub struct Interrupter {
    current: Arc<Mutex<Option<CancellationToken>>>,
}

impl Interrupter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new interruptible operation and return its token.
    pub fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current = Some(token.clone());
        token
    }

    /// Mark the current operation finished.  Later interrupts are not delivered to it.
    pub fn disarm(&self) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current = None;
    }

    /// Cancel the current operation.  Returns false when nothing was in flight.
    pub fn interrupt(&self) -> bool {
        let current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        match current.as_ref() {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }
}
