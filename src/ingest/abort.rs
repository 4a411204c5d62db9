// src/ingest/abort.rs
//! Caller-side cancellation for in-flight aggregation.
//!
//! `AbortHandle::new()` returns the handle plus a cloneable `AbortSignal`.
//! Every per-source fetch races against `AbortSignal::aborted()`, so a caller
//! that goes away can stop all pending upstream requests at once.

use tokio::sync::watch;

#[derive(Debug)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl AbortHandle {
    pub fn new() -> (Self, AbortSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, AbortSignal { rx: Some(rx) })
    }

    pub fn abort(&self) {
        // send_replace succeeds even when every signal has been dropped
        self.tx.send_replace(true);
    }
}

impl AbortSignal {
    /// Signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_aborted(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once `abort()` is called. Pending forever if the handle is
    /// dropped without aborting.
    pub async fn aborted(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        if rx.wait_for(|v| *v).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::never()
    }
}
