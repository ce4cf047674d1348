//! # kubesync-sync
//!
//! List/watch reconciliation into a local data sink.
//!
//! A [`Reconciler`] runs one cycle: list, reset the subtree, load the
//! snapshot, then apply watch events in arrival order. A [`SyncEngine`] wraps
//! it in a retry loop whose delay is chosen by [`Backoff`] according to the
//! [`FailureKind`] of each failed cycle.

pub mod backoff;
pub mod engine;
pub mod error;
pub mod memory;
pub mod path;
pub mod reconciler;
pub mod sink;
pub mod source;
pub mod stop;

pub use backoff::Backoff;
pub use engine::{retry_delay, SyncEngine, WorkerHandle, WorkerState, WorkerStatus};
pub use error::{FailureKind, SinkError, SourceError, SyncError};
pub use memory::MemorySink;
pub use reconciler::Reconciler;
pub use sink::DataSink;
pub use source::{ChannelSubscription, ResourceSource, Subscription};
pub use stop::{stop_channel, StopHandle, StopSignal};
