//! One independent sync worker per configured resource type.

use std::sync::Arc;

use tokio::sync::watch;

use kubesync_core::{BackoffConfig, ResourceType};
use kubesync_sync::{
    Backoff, DataSink, Reconciler, ResourceSource, SyncEngine, WorkerHandle, WorkerStatus,
};

/// Running workers. Stopping the fleet stops every worker's handle.
pub struct Fleet {
    workers: Vec<WorkerHandle>,
}

/// Read-only view of every worker's status, cheap to clone into tasks.
#[derive(Clone)]
pub struct StatusBoard {
    receivers: Vec<watch::Receiver<WorkerStatus>>,
}

impl StatusBoard {
    pub fn snapshot(&self) -> Vec<WorkerStatus> {
        self.receivers.iter().map(|rx| rx.borrow().clone()).collect()
    }
}

impl Fleet {
    /// Spawn a worker for each resource. `source_for` builds the source bound
    /// to one resource type; the sink is shared across workers.
    pub fn spawn<F>(
        resources: &[ResourceType],
        backoff: &BackoffConfig,
        sink: Arc<dyn DataSink>,
        mut source_for: F,
    ) -> Self
    where
        F: FnMut(&ResourceType) -> Arc<dyn ResourceSource>,
    {
        let workers = resources
            .iter()
            .map(|resource| {
                let reconciler =
                    Reconciler::new(resource.clone(), source_for(resource), sink.clone());
                let engine =
                    SyncEngine::new(reconciler, Backoff::new(backoff.min(), backoff.max()));
                tracing::info!(resource = %resource, "starting sync worker");
                engine.spawn()
            })
            .collect();
        Self { workers }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn status_board(&self) -> StatusBoard {
        StatusBoard {
            receivers: self
                .workers
                .iter()
                .map(WorkerHandle::subscribe_status)
                .collect(),
        }
    }

    pub fn stop_all(&self) {
        for worker in &self.workers {
            worker.stop();
        }
    }

    /// Stop every worker and wait for all of them to exit.
    pub async fn shutdown(self) {
        self.stop_all();
        for worker in self.workers {
            let resource = worker.status().resource;
            if let Err(err) = worker.join().await {
                tracing::error!(resource = %resource, error = %err, "sync worker panicked");
            }
        }
    }
}
