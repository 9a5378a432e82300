//! One-shot close notification shared between tasks

use std::sync::Arc;
use tokio::sync::watch;

/// A flag that flips from open to closed exactly once
///
/// Any number of tasks can wait on it; all of them wake when it closes.
#[derive(Debug, Clone)]
pub struct CloseSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CloseSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Closes the signal
    ///
    /// Returns `true` only for the call that actually performed the close.
    pub fn close(&self) -> bool {
        self.tx.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal is closed
    pub async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives in `self`, so this only ends when the flag flips
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}
