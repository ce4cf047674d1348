//! Per-worker stop signal.

use std::sync::Arc;

use tokio::sync::watch;

/// Create a connected stop handle / signal pair.
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle(Arc::new(tx)), StopSignal(rx))
}

/// Requests a worker to stop at its next suspension point.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<watch::Sender<bool>>);

impl StopHandle {
    /// Idempotent.
    pub fn stop(&self) {
        self.0.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.0.borrow()
    }
}

/// The worker side of a [`StopHandle`].
#[derive(Debug, Clone)]
pub struct StopSignal(watch::Receiver<bool>);

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once stop has been requested. If every handle is dropped
    /// without stopping, this never resolves. Cancel-safe.
    pub async fn stopped(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn stop_wakes_waiter() {
        let (handle, mut signal) = stop_channel();
        let waiter = tokio::spawn(async move {
            signal.stopped().await;
        });
        handle.stop();
        waiter.await.expect("waiter finished");
        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn stop_before_wait_is_observed() {
        let (handle, mut signal) = stop_channel();
        handle.stop();
        handle.stop();
        signal.stopped().await;
        assert!(signal.is_stopped());
    }

    #[test]
    fn pending_until_stop_then_woken() {
        let (handle, mut signal) = stop_channel();
        let mut waiter = tokio_test::task::spawn(signal.stopped());
        tokio_test::assert_pending!(waiter.poll());

        handle.stop();
        assert!(waiter.is_woken());
        tokio_test::assert_ready!(waiter.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_handle_does_not_stop() {
        let (handle, mut signal) = stop_channel();
        drop(handle);
        let outcome = tokio::time::timeout(Duration::from_secs(60), signal.stopped()).await;
        assert!(outcome.is_err(), "signal must stay pending without an explicit stop");
    }
}
