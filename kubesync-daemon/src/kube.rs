//! List/watch source backed by a Kubernetes-style REST API.
//!
//! `ureq` is blocking: list and watch-open run on the blocking pool, and an
//! open watch body is drained on a dedicated thread that feeds a
//! [`ChannelSubscription`]. Watch reads time out every [`WATCH_POLL`] so the
//! reader notices a closed subscription on a quiet stream and drops the
//! connection.

use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;

use kubesync_core::{
    ChangeEvent, Listing, ResourceObject, ResourceType, ResumptionToken, SourceConfig,
};
use kubesync_sync::{ChannelSubscription, ResourceSource, SourceError, Subscription};

const WATCH_BUFFER: usize = 64;

/// Longest a watch reader blocks before re-checking whether it was closed.
pub const WATCH_POLL: Duration = Duration::from_secs(1);

/// Lists and watches one resource type.
#[derive(Clone)]
pub struct KubeSource {
    agent: ureq::Agent,
    watch_agent: ureq::Agent,
    url: String,
    resource: ResourceType,
    token_file: Option<PathBuf>,
}

impl KubeSource {
    pub fn new(config: &SourceConfig, resource: ResourceType) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .build();
        // A read timeout on the watch agent is an idle tick, not a failure.
        let watch_agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(WATCH_POLL)
            .build();
        Self {
            agent,
            watch_agent,
            url: collection_url(&config.api_server, &resource),
            resource,
            token_file: config.token_file.clone(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request(&self, agent: &ureq::Agent) -> ureq::Request {
        agent.get(&self.url).set("Accept", "application/json")
    }
}

/// `Bearer <token>` from a token file, re-read per request so rotated tokens
/// are picked up. Blocking; call it from the blocking pool.
fn read_bearer(token_file: &Path) -> Result<String, SourceError> {
    let token = std::fs::read_to_string(token_file).map_err(|e| {
        SourceError::Transport(format!("read token file {}: {e}", token_file.display()))
    })?;
    Ok(format!("Bearer {}", token.trim()))
}

fn authorize(
    request: ureq::Request,
    token_file: Option<&Path>,
) -> Result<ureq::Request, SourceError> {
    match token_file {
        Some(path) => Ok(request.set("Authorization", &read_bearer(path)?)),
        None => Ok(request),
    }
}

/// `{api}/api/{version}/{resource}` for the core group,
/// `{api}/apis/{group}/{version}/{resource}` otherwise.
pub fn collection_url(api_server: &str, resource: &ResourceType) -> String {
    let base = api_server.trim_end_matches('/');
    if resource.is_core_group() {
        format!("{base}/api/{}/{}", resource.version, resource.resource)
    } else {
        format!(
            "{base}/apis/{}/{}/{}",
            resource.group, resource.version, resource.resource
        )
    }
}

fn map_ureq_error(err: ureq::Error) -> SourceError {
    match err {
        ureq::Error::Status(status, response) => SourceError::Status {
            status,
            message: response.into_string().unwrap_or_default(),
        },
        ureq::Error::Transport(transport) => SourceError::Transport(transport.to_string()),
    }
}

async fn blocking<T, F>(f: F) -> Result<T, SourceError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SourceError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SourceError::Transport(format!("blocking task failed: {e}")))?
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Extract items and `metadata.resourceVersion` from a list response.
pub fn parse_listing(body: Value) -> Result<Listing, SourceError> {
    let token = body
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
        .ok_or_else(|| SourceError::Decode("list response has no metadata.resourceVersion".into()))?
        .to_string();

    let items = match body.get("items") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().cloned().map(ResourceObject::new).collect(),
        Some(other) => {
            return Err(SourceError::Decode(format!(
                "list response items is not an array: {other}"
            )))
        }
    };

    Ok(Listing {
        items,
        token: ResumptionToken(token),
    })
}

#[derive(Debug, Deserialize)]
struct WatchLine {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    object: Value,
}

/// Decode one line of a watch body. Unknown event types end the stream.
pub fn decode_event(line: &str) -> ChangeEvent {
    let parsed: WatchLine = match serde_json::from_str(line) {
        Ok(parsed) => parsed,
        Err(err) => return ChangeEvent::Error(format!("undecodable watch event: {err}")),
    };
    match parsed.kind.as_str() {
        "ADDED" => ChangeEvent::Added(ResourceObject::new(parsed.object)),
        "MODIFIED" => ChangeEvent::Modified(ResourceObject::new(parsed.object)),
        "DELETED" => ChangeEvent::Deleted(ResourceObject::new(parsed.object)),
        "ERROR" => ChangeEvent::Error(status_message(&parsed.object)),
        _ => ChangeEvent::Closed,
    }
}

fn status_message(status: &Value) -> String {
    status
        .get("message")
        .or_else(|| status.get("reason"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| status.to_string())
}

/// Forward decoded events until the body ends, a terminal event is sent, or
/// the subscription is closed. Returning drops `reader`, which releases the
/// HTTP connection.
fn pump_events(
    mut reader: impl Read,
    tx: mpsc::Sender<ChangeEvent>,
    cancelled: Arc<AtomicBool>,
    resource: &str,
) {
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 8 * 1024];
    loop {
        if cancelled.load(Ordering::SeqCst) || tx.is_closed() {
            tracing::debug!(resource = %resource, "watch closed, releasing connection");
            return;
        }
        let read = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if is_idle(&err) => continue,
            Err(err) => {
                let _ = tx.blocking_send(ChangeEvent::Error(format!(
                    "watch stream read failed: {err}"
                )));
                return;
            }
        };
        pending.extend_from_slice(&chunk[..read]);
        while let Some(newline) = pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = pending.drain(..=newline).collect();
            if !forward_line(&line, &tx) {
                return;
            }
        }
    }
    if !pending.is_empty() && !forward_line(&pending, &tx) {
        return;
    }
    tracing::debug!(resource = %resource, "watch body ended");
}

/// Send one decoded line. `false` once the stream should stop.
fn forward_line(line: &[u8], tx: &mpsc::Sender<ChangeEvent>) -> bool {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return true;
    }
    let event = decode_event(line);
    let terminal = matches!(event, ChangeEvent::Error(_) | ChangeEvent::Closed);
    tx.blocking_send(event).is_ok() && !terminal
}

fn is_idle(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
    )
}

// ---------------------------------------------------------------------------
// ResourceSource
// ---------------------------------------------------------------------------

#[async_trait]
impl ResourceSource for KubeSource {
    async fn list(&self) -> Result<Listing, SourceError> {
        let request = self.request(&self.agent);
        let token_file = self.token_file.clone();
        blocking(move || {
            let response = authorize(request, token_file.as_deref())?
                .call()
                .map_err(map_ureq_error)?;
            let body: Value = response
                .into_json()
                .map_err(|e| SourceError::Decode(e.to_string()))?;
            parse_listing(body)
        })
        .await
    }

    async fn watch(&self, token: &ResumptionToken) -> Result<Box<dyn Subscription>, SourceError> {
        let request = self
            .request(&self.watch_agent)
            .query("watch", "true")
            .query("resourceVersion", &token.0);
        let token_file = self.token_file.clone();
        let response = blocking(move || {
            authorize(request, token_file.as_deref())?
                .call()
                .map_err(map_ureq_error)
        })
        .await?;

        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let subscription = ChannelSubscription::new(rx);
        let cancelled = subscription.cancelled();
        let resource = self.resource.to_string();
        std::thread::Builder::new()
            .name(format!("watch-{}", self.resource.resource))
            .spawn(move || pump_events(response.into_reader(), tx, cancelled, &resource))
            .map_err(|e| SourceError::Transport(format!("spawn watch reader: {e}")))?;

        Ok(Box::new(subscription))
    }
}
