//! The remote list/watch collaborator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use kubesync_core::{ChangeEvent, Listing, ResumptionToken};

use crate::error::SourceError;

/// A remote collection that supports a consistent listing and a watch
/// anchored at the listing's resumption token.
#[async_trait]
pub trait ResourceSource: Send + Sync {
    async fn list(&self) -> Result<Listing, SourceError>;

    /// Open a subscription for changes after `token`.
    async fn watch(&self, token: &ResumptionToken) -> Result<Box<dyn Subscription>, SourceError>;
}

/// An open watch. Owned by one reconciliation cycle and closed on every exit path.
#[async_trait]
pub trait Subscription: Send {
    /// Next event in arrival order. Returns [`ChangeEvent::Closed`] once the
    /// stream has ended. Must be cancel-safe: dropping the future loses no
    /// event that has not been returned.
    async fn next_event(&mut self) -> ChangeEvent;

    /// Release the subscription at the remote source.
    fn close(&mut self);
}

/// A subscription fed by an mpsc channel.
///
/// The producer observes [`ChannelSubscription::cancelled`] (or a failed send)
/// and stops once the subscription is closed.
pub struct ChannelSubscription {
    rx: mpsc::Receiver<ChangeEvent>,
    cancelled: Arc<AtomicBool>,
}

impl ChannelSubscription {
    pub fn new(rx: mpsc::Receiver<ChangeEvent>) -> Self {
        Self {
            rx,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag shared with the producer; set once the subscription is closed.
    pub fn cancelled(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Subscription for ChannelSubscription {
    async fn next_event(&mut self) -> ChangeEvent {
        self.rx.recv().await.unwrap_or(ChangeEvent::Closed)
    }

    fn close(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.rx.close();
    }
}
