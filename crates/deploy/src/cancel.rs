//! Caller-initiated cancellation of in-flight deployments.

use std::time::Duration;

use tokio::sync::watch;

use crate::DeployError;

/// Trips every [`CancelSignal`] created from the same pair.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

/// Observed at every suspension point of the pipeline.
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

/// Create a linked handle and signal.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(tx), CancelSignal(rx))
}

impl CancelHandle {
    pub fn cancel(&self) {
        // No receivers left means nothing is running; ignore.
        let _ = self.0.send(true);
    }
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self(rx)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolve once cancellation is requested.
    pub async fn cancelled(&self) {
        let mut rx = self.0.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone without cancelling: this can never fire.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Sleep for `duration` unless cancelled first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), DeployError> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancelled() => Err(DeployError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_interrupted_by_cancel() {
        let (handle, signal) = cancel_pair();

        let sleeper = tokio::spawn({
            let signal = signal.clone();
            async move { signal.sleep(Duration::from_secs(3600)).await }
        });
        handle.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), sleeper)
            .await
            .expect("sleep was not interrupted")
            .unwrap();
        assert!(matches!(result, Err(DeployError::Cancelled)));
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_never_signal_sleeps_normally() {
        let signal = CancelSignal::never();
        assert!(signal.sleep(Duration::from_millis(5)).await.is_ok());
        assert!(!signal.is_cancelled());
    }
}
