//! Scripted source and recording sink shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;

use kubesync_core::{ChangeEvent, Listing, ResourceObject, ResumptionToken};
use kubesync_sync::{
    ChannelSubscription, DataSink, MemorySink, ResourceSource, SinkError, SourceError,
    Subscription,
};

/// One observable collaborator call, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List,
    Watch(String),
    Reset(String),
    Upsert(String),
    Remove(String),
}

pub type CallLog = Arc<Mutex<Vec<(Call, Instant)>>>;

pub fn new_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn calls(log: &CallLog) -> Vec<Call> {
    log.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
}

pub fn times_of(log: &CallLog, call: &Call) -> Vec<Instant> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|(c, _)| c == call)
        .map(|(_, t)| *t)
        .collect()
}

fn record(log: &CallLog, call: Call) {
    log.lock().unwrap().push((call, Instant::now()));
}

pub fn obj(name: &str) -> ResourceObject {
    ResourceObject::new(json!({"metadata": {"name": name}, "data": {"v": 1}}))
}

pub fn obj_with(name: &str, data: Value) -> ResourceObject {
    ResourceObject::new(json!({"metadata": {"name": name}, "data": data}))
}

pub fn namespaced(namespace: &str, name: &str) -> ResourceObject {
    ResourceObject::new(json!({"metadata": {"name": name, "namespace": namespace}}))
}

// ---------------------------------------------------------------------------
// Scripted source
// ---------------------------------------------------------------------------

/// What a scripted watch does after delivering its events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tail {
    /// End the stream: the subscriber sees `Closed`.
    Close,
    /// Keep the stream open forever.
    Hang,
}

pub struct WatchScript {
    pub events: Vec<ChangeEvent>,
    pub tail: Tail,
}

pub enum WatchStep {
    Open(WatchScript),
    Fail(SourceError),
}

/// Replays scripted list and watch results. Once a script is exhausted,
/// `list` returns an empty listing and `watch` hangs.
#[derive(Default)]
pub struct ScriptedSource {
    log: Option<CallLog>,
    lists: Mutex<VecDeque<Result<Listing, SourceError>>>,
    watches: Mutex<VecDeque<WatchStep>>,
    held: Mutex<Vec<mpsc::Sender<ChangeEvent>>>,
    closed_flags: Mutex<Vec<Arc<AtomicBool>>>,
}

impl ScriptedSource {
    pub fn new(log: CallLog) -> Self {
        Self {
            log: Some(log),
            ..Self::default()
        }
    }

    pub fn list_ok(self, items: Vec<ResourceObject>, token: &str) -> Self {
        self.lists.lock().unwrap().push_back(Ok(Listing {
            items,
            token: ResumptionToken::from(token),
        }));
        self
    }

    pub fn list_err(self, err: SourceError) -> Self {
        self.lists.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn watch_events(self, events: Vec<ChangeEvent>, tail: Tail) -> Self {
        self.watches
            .lock()
            .unwrap()
            .push_back(WatchStep::Open(WatchScript { events, tail }));
        self
    }

    pub fn watch_err(self, err: SourceError) -> Self {
        self.watches.lock().unwrap().push_back(WatchStep::Fail(err));
        self
    }

    /// Subscriptions opened so far, and whether each has been closed.
    pub fn subscriptions_closed(&self) -> Vec<bool> {
        self.closed_flags
            .lock()
            .unwrap()
            .iter()
            .map(|f| f.load(Ordering::SeqCst))
            .collect()
    }

    fn log(&self, call: Call) {
        if let Some(log) = &self.log {
            record(log, call);
        }
    }
}

#[async_trait]
impl ResourceSource for ScriptedSource {
    async fn list(&self) -> Result<Listing, SourceError> {
        self.log(Call::List);
        let next = self.lists.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(Listing {
                items: vec![],
                token: ResumptionToken::from("exhausted"),
            })
        })
    }

    async fn watch(&self, token: &ResumptionToken) -> Result<Box<dyn Subscription>, SourceError> {
        self.log(Call::Watch(token.0.clone()));
        let step = self.watches.lock().unwrap().pop_front();
        let script = match step {
            Some(WatchStep::Fail(err)) => return Err(err),
            Some(WatchStep::Open(script)) => script,
            None => WatchScript {
                events: vec![],
                tail: Tail::Hang,
            },
        };

        let (tx, rx) = mpsc::channel(script.events.len() + 1);
        for event in script.events {
            tx.try_send(event).expect("scripted channel has room");
        }
        if script.tail == Tail::Hang {
            self.held.lock().unwrap().push(tx);
        }

        let subscription = ChannelSubscription::new(rx);
        self.closed_flags
            .lock()
            .unwrap()
            .push(subscription.cancelled());
        Ok(Box::new(subscription))
    }
}

// ---------------------------------------------------------------------------
// Recording sink
// ---------------------------------------------------------------------------

/// A [`MemorySink`] that logs every attempted call and can be told to fail.
pub struct RecordingSink {
    log: CallLog,
    pub store: MemorySink,
    fail_resets: Mutex<usize>,
    fail_paths: Mutex<HashSet<String>>,
}

impl RecordingSink {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            store: MemorySink::new(),
            fail_resets: Mutex::new(0),
            fail_paths: Mutex::new(HashSet::new()),
        }
    }

    /// Fail the next `n` subtree resets.
    pub fn fail_resets(self, n: usize) -> Self {
        *self.fail_resets.lock().unwrap() = n;
        self
    }

    /// Fail the next upsert or remove at `path` (once).
    pub fn fail_path_once(self, path: &str) -> Self {
        self.fail_paths.lock().unwrap().insert(path.to_string());
        self
    }

    fn injected_path_failure(&self, path: &str) -> Result<(), SinkError> {
        if self.fail_paths.lock().unwrap().remove(path) {
            return Err(SinkError::Status {
                status: 500,
                message: format!("injected failure at {path}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DataSink for RecordingSink {
    async fn replace_subtree(&self, prefix: &str, value: Value) -> Result<(), SinkError> {
        record(&self.log, Call::Reset(prefix.to_string()));
        {
            let mut remaining = self.fail_resets.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SinkError::Transport("connection refused".into()));
            }
        }
        self.store.replace_subtree(prefix, value).await
    }

    async fn upsert(&self, path: &str, object: &ResourceObject) -> Result<(), SinkError> {
        record(&self.log, Call::Upsert(path.to_string()));
        self.injected_path_failure(path)?;
        self.store.upsert(path, object).await
    }

    async fn remove(&self, path: &str) -> Result<(), SinkError> {
        record(&self.log, Call::Remove(path.to_string()));
        self.injected_path_failure(path)?;
        self.store.remove(path).await
    }
}
