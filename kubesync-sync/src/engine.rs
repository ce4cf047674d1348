//! Retry loop around [`Reconciler`].
//!
//! Classification and policy are kept apart: [`SyncError::kind`] says what
//! failed, [`retry_delay`] says how long to wait before the next cycle.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backoff::Backoff;
use crate::error::{FailureKind, SyncError};
use crate::reconciler::Reconciler;
use crate::stop::{stop_channel, StopHandle, StopSignal};

/// Lifecycle phase of a worker, as reported to status consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Starting,
    Syncing,
    BackingOff,
    Stopped,
}

/// Point-in-time view of one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub resource: String,
    pub state: WorkerState,
    /// Cycles started so far.
    pub cycles: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub retry_delay_ms: u64,
}

/// Pick the wait before the next cycle and update `backoff` accordingly.
///
/// `None` means restart immediately.
pub fn retry_delay(backoff: &mut Backoff, kind: FailureKind) -> Option<Duration> {
    match kind {
        FailureKind::ChannelClosed => {
            backoff.reset();
            None
        }
        FailureKind::Sink => {
            backoff.reset();
            Some(backoff.delay())
        }
        FailureKind::Source => Some(backoff.on_source_failure()),
    }
}

/// Owns the retry loop for a single resource type.
pub struct SyncEngine {
    reconciler: Reconciler,
    backoff: Backoff,
}

impl SyncEngine {
    pub fn new(reconciler: Reconciler, backoff: Backoff) -> Self {
        Self {
            reconciler,
            backoff,
        }
    }

    fn initial_status(&self) -> WorkerStatus {
        WorkerStatus {
            resource: self.reconciler.resource().to_string(),
            state: WorkerState::Starting,
            cycles: 0,
            last_error: None,
            retry_delay_ms: self.backoff.delay().as_millis() as u64,
        }
    }

    /// Spawn the retry loop on the current tokio runtime.
    pub fn spawn(self) -> WorkerHandle {
        let (stop, signal) = stop_channel();
        let (status_tx, status_rx) = watch::channel(self.initial_status());
        let task = tokio::spawn(self.run(signal, status_tx));
        WorkerHandle {
            stop,
            status: status_rx,
            task,
        }
    }

    /// Run cycles until the stop signal is observed.
    pub async fn run(mut self, mut stop: StopSignal, status: watch::Sender<WorkerStatus>) {
        let resource = self.reconciler.resource().to_string();
        status.send_replace(self.initial_status());

        loop {
            status.send_modify(|s| {
                s.state = WorkerState::Syncing;
                s.cycles += 1;
            });

            let err = match self.reconciler.run_once(&mut stop).await {
                Ok(()) => break,
                Err(err) => err,
            };

            let kind = err.kind();
            let wait = retry_delay(&mut self.backoff, kind);
            log_failure(&resource, &err, wait);

            status.send_modify(|s| {
                s.last_error = match kind {
                    FailureKind::ChannelClosed => None,
                    _ => Some(err.to_string()),
                };
                s.retry_delay_ms = wait.unwrap_or_default().as_millis() as u64;
            });

            let Some(wait) = wait else { continue };

            status.send_modify(|s| s.state = WorkerState::BackingOff);
            tokio::select! {
                biased;
                _ = stop.stopped() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        status.send_modify(|s| s.state = WorkerState::Stopped);
        tracing::info!(resource = %resource, "sync finished, exiting");
    }
}

fn log_failure(resource: &str, err: &SyncError, wait: Option<Duration>) {
    let delay_ms = wait.unwrap_or_default().as_millis() as u64;
    match err.kind() {
        FailureKind::ChannelClosed => {
            tracing::info!(resource = %resource, "sync channel closed, restarting immediately");
        }
        FailureKind::Sink => {
            tracing::error!(
                resource = %resource,
                error = %err,
                delay_ms,
                "sync failed due to sink error, retrying",
            );
        }
        FailureKind::Source => {
            tracing::error!(
                resource = %resource,
                error = %err,
                delay_ms,
                "sync failed due to source error, retrying",
            );
        }
    }
}

/// Handle to a spawned worker.
pub struct WorkerHandle {
    stop: StopHandle,
    status: watch::Receiver<WorkerStatus>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Ask the worker to stop at its next suspension point. Idempotent.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn status(&self) -> WorkerStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<WorkerStatus> {
        self.status.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the worker task to exit.
    pub async fn join(self) -> Result<(), tokio::task::JoinError> {
        self.task.await
    }

    /// Stop, then wait for exit.
    pub async fn shutdown(self) -> Result<(), tokio::task::JoinError> {
        self.stop();
        self.join().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn channel_closed_restarts_immediately_and_resets() {
        let mut backoff = Backoff::default();
        backoff.on_source_failure();
        backoff.on_source_failure();
        assert_eq!(retry_delay(&mut backoff, FailureKind::ChannelClosed), None);
        assert_eq!(backoff.delay(), secs(1));
    }

    #[test]
    fn sink_failure_waits_at_floor_after_source_growth() {
        let mut backoff = Backoff::default();
        for _ in 0..3 {
            retry_delay(&mut backoff, FailureKind::Source);
        }
        assert_eq!(retry_delay(&mut backoff, FailureKind::Sink), Some(secs(1)));
        assert_eq!(retry_delay(&mut backoff, FailureKind::Source), Some(secs(1)));
    }

    #[test]
    fn source_failures_grow_1_2_4() {
        let mut backoff = Backoff::default();
        let waits: Vec<_> = (0..3)
            .map(|_| retry_delay(&mut backoff, FailureKind::Source))
            .collect();
        assert_eq!(waits, vec![Some(secs(1)), Some(secs(2)), Some(secs(4))]);
    }

    #[test]
    fn status_serializes_state_in_snake_case() {
        let status = WorkerStatus {
            resource: "v1/pods".into(),
            state: WorkerState::BackingOff,
            cycles: 3,
            last_error: None,
            retry_delay_ms: 2_000,
        };
        let json = serde_json::to_value(&status).expect("serialize");
        assert_eq!(json["state"], "backing_off");
        assert!(json.get("last_error").is_none());
    }
}
