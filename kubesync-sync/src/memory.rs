//! In-process data sink, used for dry runs and tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use kubesync_core::ResourceObject;

use crate::error::SinkError;
use crate::path::join;
use crate::sink::DataSink;

/// Flat path → document map. Cloning shares the underlying store.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    docs: Arc<RwLock<BTreeMap<String, Value>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, path: &str) -> Option<Value> {
        self.docs.read().await.get(path).cloned()
    }

    pub async fn snapshot(&self) -> BTreeMap<String, Value> {
        self.docs.read().await.clone()
    }

    /// Paths currently stored under `prefix`, sorted.
    pub async fn paths_under(&self, prefix: &str) -> Vec<String> {
        let docs = self.docs.read().await;
        docs.keys()
            .filter(|key| is_under(key, prefix))
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }
}

fn is_under(key: &str, prefix: &str) -> bool {
    key == prefix
        || key
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[async_trait]
impl DataSink for MemorySink {
    async fn replace_subtree(&self, prefix: &str, value: Value) -> Result<(), SinkError> {
        let mut docs = self.docs.write().await;
        docs.retain(|key, _| !is_under(key, prefix));
        match value {
            Value::Object(entries) => {
                for (key, doc) in entries {
                    docs.insert(join(prefix, &key), doc);
                }
            }
            other => {
                docs.insert(prefix.to_string(), other);
            }
        }
        Ok(())
    }

    async fn upsert(&self, path: &str, object: &ResourceObject) -> Result<(), SinkError> {
        self.docs
            .write()
            .await
            .insert(path.to_string(), object.as_value().clone());
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), SinkError> {
        self.docs.write().await.remove(path);
        Ok(())
    }
}
