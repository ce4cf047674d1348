//! The local data store collaborator.

use async_trait::async_trait;
use serde_json::Value;

use kubesync_core::ResourceObject;

use crate::error::SinkError;

/// A hierarchical data store. Each call is one indivisible operation; no
/// transaction spans more than one call.
///
/// Implementations must tolerate concurrent use by workers writing disjoint
/// prefixes.
#[async_trait]
pub trait DataSink: Send + Sync {
    /// Replace everything under `prefix` with `value`.
    async fn replace_subtree(&self, prefix: &str, value: Value) -> Result<(), SinkError>;

    /// Insert or overwrite the object at `path`. Idempotent.
    async fn upsert(&self, path: &str, object: &ResourceObject) -> Result<(), SinkError>;

    /// Remove the object at `path`. Removing an absent path succeeds.
    async fn remove(&self, path: &str) -> Result<(), SinkError>;
}
