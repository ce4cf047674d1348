//! Data sink backed by an OPA-style `/v1/data` HTTP API.
//!
//! | operation         | request                              |
//! |-------------------|--------------------------------------|
//! | `replace_subtree` | `PUT /v1/data/<root>/<prefix>`       |
//! | `upsert`          | `PUT /v1/data/<root>/<path>`         |
//! | `remove`          | `DELETE /v1/data/<root>/<path>`, 404 is success |

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use kubesync_core::{ResourceObject, SinkConfig};
use kubesync_sync::path::join;
use kubesync_sync::{DataSink, SinkError};

#[derive(Clone)]
pub struct OpaSink {
    agent: ureq::Agent,
    timeout: Duration,
    base: String,
    root: String,
    authorization: Option<String>,
}

impl OpaSink {
    pub fn new(config: &SinkConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            timeout,
            base: config.url.trim_end_matches('/').to_string(),
            root: config.root.trim_matches('/').to_string(),
            authorization: config.token.as_ref().map(|t| format!("Bearer {t}")),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Full URL of the document at `path` under the configured root.
    pub fn data_url(&self, path: &str) -> String {
        format!("{}/v1/data/{}", self.base, join(&self.root, path))
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        let request = self.agent.request(method, &self.data_url(path));
        match &self.authorization {
            Some(auth) => request.set("Authorization", auth),
            None => request,
        }
    }

    async fn put(&self, path: &str, body: Value) -> Result<(), SinkError> {
        let request = self.request("PUT", path);
        execute(move || request.send_json(body), false).await
    }
}

/// Run a blocking request; `allow_not_found` treats 404 as success.
async fn execute<F>(call: F, allow_not_found: bool) -> Result<(), SinkError>
where
    F: FnOnce() -> Result<ureq::Response, ureq::Error> + Send + 'static,
{
    let result = tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| SinkError::Transport(format!("blocking task failed: {e}")))?;
    classify(result, allow_not_found)
}

fn classify(
    result: Result<ureq::Response, ureq::Error>,
    allow_not_found: bool,
) -> Result<(), SinkError> {
    match result {
        Ok(_) => Ok(()),
        Err(ureq::Error::Status(404, _)) if allow_not_found => Ok(()),
        Err(ureq::Error::Status(status, response)) => Err(SinkError::Status {
            status,
            message: response.into_string().unwrap_or_default(),
        }),
        Err(ureq::Error::Transport(transport)) => Err(SinkError::Transport(transport.to_string())),
    }
}

#[async_trait]
impl DataSink for OpaSink {
    async fn replace_subtree(&self, prefix: &str, value: Value) -> Result<(), SinkError> {
        self.put(prefix, value).await
    }

    async fn upsert(&self, path: &str, object: &ResourceObject) -> Result<(), SinkError> {
        self.put(path, object.as_value().clone()).await
    }

    async fn remove(&self, path: &str) -> Result<(), SinkError> {
        let request = self.request("DELETE", path);
        execute(move || request.call(), true).await
    }
}
