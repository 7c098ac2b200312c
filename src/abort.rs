//! Cooperative cancellation for long-running operations
//!
//! An [`AbortHandle`]/[`AbortSignal`] pair carries an external cancel
//! request into retrieval races and pagination loops. The signal side is
//! cheap to clone and is polled with `select!`.

use tokio::sync::watch;

/// Caller-held side of a cancellation pair
#[derive(Debug)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

/// Operation-held side of a cancellation pair
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortHandle {
    /// Create a linked handle/signal pair
    pub fn new() -> (AbortHandle, AbortSignal) {
        let (tx, rx) = watch::channel(false);
        (AbortHandle { tx }, AbortSignal { rx })
    }

    /// Request cancellation of every operation holding the signal
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

impl AbortSignal {
    /// A signal that never fires, for operations run without a handle
    pub fn never() -> AbortSignal {
        let (_tx, rx) = watch::channel(false);
        AbortSignal { rx }
    }

    /// True once the handle has fired
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when the handle fires; pends forever if the handle is
    /// dropped without firing
    pub async fn aborted(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_abort_fires_signal() {
        let (handle, signal) = AbortHandle::new();
        assert!(!signal.is_aborted());
        handle.abort();
        assert!(signal.is_aborted());
        // Resolves immediately once fired
        tokio::time::timeout(Duration::from_millis(50), signal.aborted())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_handle_never_aborts() {
        let (handle, signal) = AbortHandle::new();
        drop(handle);
        assert!(!signal.is_aborted());
        let timed_out =
            tokio::time::timeout(Duration::from_millis(20), signal.aborted()).await;
        assert!(timed_out.is_err());
    }

    #[tokio::test]
    async fn test_never_signal_pends() {
        let signal = AbortSignal::never();
        assert!(!signal.is_aborted());
        let timed_out =
            tokio::time::timeout(Duration::from_millis(20), signal.aborted()).await;
        assert!(timed_out.is_err());
    }
}
