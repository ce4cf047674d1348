//! One reconciliation cycle.
//!
//! ## Cycle protocol
//!
//! 1. List the remote collection (source step).
//! 2. Keep the listing's resumption token.
//! 3. Reset the local subtree to `{}` (sink step).
//! 4. Upsert every listed object, in listing order (sink step).
//! 5. Open a watch at the token (source step).
//! 6. Apply events one at a time, in arrival order, until the stream errors,
//!    closes, or the stop signal fires.
//!
//! The snapshot load is not transactional: a failure in step 4 leaves a
//! subset of the snapshot in the sink, and the next cycle starts again at step 1.

use std::sync::Arc;

use serde_json::json;
use tokio::time::Instant;

use kubesync_core::{ChangeEvent, Listing, ResourceObject, ResourceType};

use crate::error::{sink_err, source_err, SinkError, SourceError, SyncError};
use crate::path::{join, path};
use crate::sink::DataSink;
use crate::source::{ResourceSource, Subscription};
use crate::stop::StopSignal;

/// Mirrors one resource type from a source into a sink.
pub struct Reconciler {
    resource: ResourceType,
    source: Arc<dyn ResourceSource>,
    sink: Arc<dyn DataSink>,
}

impl Reconciler {
    pub fn new(
        resource: ResourceType,
        source: Arc<dyn ResourceSource>,
        sink: Arc<dyn DataSink>,
    ) -> Self {
        Self {
            resource,
            source,
            sink,
        }
    }

    pub fn resource(&self) -> &ResourceType {
        &self.resource
    }

    /// Run one full cycle.
    ///
    /// `Ok(())` means the stop signal was observed while watching. Every
    /// other exit is an error whose [`SyncError::kind`] drives the retry policy.
    pub async fn run_once(&self, stop: &mut StopSignal) -> Result<(), SyncError> {
        tracing::info!(resource = %self.resource, "syncing");

        let list_started = Instant::now();
        let listing = self
            .source
            .list()
            .await
            .map_err(|e| source_err("list", e))?;
        tracing::info!(
            resource = %self.resource,
            items = listing.items.len(),
            token = %listing.token,
            duration_ms = list_started.elapsed().as_millis() as u64,
            "listed resources",
        );

        let load_started = Instant::now();
        self.load_snapshot(&listing).await?;
        tracing::info!(
            resource = %self.resource,
            items = listing.items.len(),
            duration_ms = load_started.elapsed().as_millis() as u64,
            token = %listing.token,
            "loaded snapshot, starting watch",
        );

        let mut subscription = self
            .source
            .watch(&listing.token)
            .await
            .map_err(|e| source_err("watch", e))?;

        let result = self.consume(&mut *subscription, stop).await;
        subscription.close();
        result
    }

    async fn load_snapshot(&self, listing: &Listing) -> Result<(), SyncError> {
        // Reset and load are separate sink operations; see the module docs.
        self.sink
            .replace_subtree(self.resource.storage_prefix(), json!({}))
            .await
            .map_err(|e| sink_err("reset", e))?;

        for item in &listing.items {
            self.put(item).await.map_err(|e| sink_err("list add", e))?;
        }
        Ok(())
    }

    async fn consume(
        &self,
        subscription: &mut dyn Subscription,
        stop: &mut StopSignal,
    ) -> Result<(), SyncError> {
        loop {
            let event = tokio::select! {
                biased;
                _ = stop.stopped() => return Ok(()),
                event = subscription.next_event() => event,
            };
            self.apply(event).await?;
        }
    }

    async fn apply(&self, event: ChangeEvent) -> Result<(), SyncError> {
        tracing::debug!(resource = %self.resource, event = event.label(), "applying event");
        match event {
            ChangeEvent::Added(obj) => self.put(&obj).await.map_err(|e| sink_err("add event", e)),
            ChangeEvent::Modified(obj) => self
                .put(&obj)
                .await
                .map_err(|e| sink_err("modify event", e)),
            ChangeEvent::Deleted(obj) => self
                .delete(&obj)
                .await
                .map_err(|e| sink_err("delete event", e)),
            ChangeEvent::Error(message) => {
                Err(source_err("error event", SourceError::Remote(message)))
            }
            ChangeEvent::Closed => Err(SyncError::ChannelClosed),
        }
    }

    fn full_path(&self, object: &ResourceObject) -> Result<String, SinkError> {
        let relative = path(&self.resource, object)?;
        Ok(join(self.resource.storage_prefix(), &relative))
    }

    async fn put(&self, object: &ResourceObject) -> Result<(), SinkError> {
        let path = self.full_path(object)?;
        self.sink.upsert(&path, object).await
    }

    async fn delete(&self, object: &ResourceObject) -> Result<(), SinkError> {
        let path = self.full_path(object)?;
        self.sink.remove(&path).await
    }
}
