//! External cancellation for in-flight evaluations.
//!
//! A [`CancelSignal`] wraps a `watch` channel carrying the cancellation
//! reason. Clones share state; the first reason sent wins.

use std::sync::Arc;
use std::time::Duration;

use fixgate_core::{GateError, Result};
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<Option<String>>>,
    rx: watch::Receiver<Option<String>>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Request cancellation. Later reasons are ignored.
    pub fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.borrow().is_some()
    }

    pub fn reason(&self) -> Option<String> {
        self.rx.borrow().clone()
    }

    /// `Err(GateError::Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        match self.reason() {
            Some(reason) => Err(GateError::Cancelled(reason)),
            None => Ok(()),
        }
    }

    /// Resolve with the reason once cancellation is requested.
    pub async fn cancelled(&self) -> String {
        let mut rx = self.rx.clone();
        loop {
            if let Some(reason) = rx.borrow_and_update().clone() {
                return reason;
            }
            if rx.changed().await.is_err() {
                // sender lives as long as any clone of self
                std::future::pending::<()>().await;
            }
        }
    }

    /// Cancel with a deadline message after `after` elapses.
    pub fn cancel_after(&self, after: Duration) -> tokio::task::JoinHandle<()> {
        let signal = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            signal.cancel(format!("deadline of {}s reached", after.as_secs()));
        })
    }
}
