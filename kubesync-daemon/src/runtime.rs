use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinSet};

use kubesync_core::{config, Config};
use kubesync_sync::{DataSink, MemorySink, ResourceSource};

use crate::error::{io_err, DaemonError};
use crate::fleet::{Fleet, StatusBoard};
use crate::kube::KubeSource;
use crate::opa::OpaSink;
use crate::paths::{kubesync_root, socket_path};
use crate::protocol::{ControlRequest, ControlResponse, StatusPayload};

/// How the daemon was asked to start.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Explicit config file; defaults to `~/.kubesync/config.yaml`.
    pub config_path: Option<PathBuf>,
    /// Mirror into an in-process store instead of the configured sink.
    pub dry_run: bool,
    /// Falls back to `KUBESYNC_LOG_FORMAT`, then text.
    pub log_format: Option<LogFormat>,
}

/// Shape of the daemon's log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        std::env::var("KUBESYNC_LOG_FORMAT")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or_default()
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'; expected: text, json")),
        }
    }
}

/// What every control-socket client can see and trigger.
#[derive(Clone)]
struct ControlContext {
    socket: PathBuf,
    board: StatusBoard,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
    dry_run: bool,
}

impl ControlContext {
    fn status(&self) -> StatusPayload {
        StatusPayload {
            dry_run: self.dry_run,
            started_at_unix: self.started_at_unix,
            socket: self.socket.clone(),
            workers: self.board.snapshot(),
        }
    }
}

/// Load config, start the daemon runtime, and block the current thread until it exits.
pub fn start_blocking(home: &Path, options: RunOptions) -> Result<(), DaemonError> {
    init_tracing(options.log_format.unwrap_or_else(LogFormat::from_env));
    let config = match &options.config_path {
        Some(path) => config::load_from(path)?,
        None => config::load_at(home)?,
    };
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), config, options.dry_run))
}

/// Run one sync worker per configured resource type plus the control socket,
/// until a stop request or ctrl-c.
pub async fn run(home: PathBuf, config: Config, dry_run: bool) -> Result<(), DaemonError> {
    let root = kubesync_root(&home);
    fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    let socket = socket_path(&home);
    let listener = bind_control_socket(&socket)?;

    let sink: Arc<dyn DataSink> = if dry_run {
        tracing::info!("dry run: mirroring into an in-process store");
        Arc::new(MemorySink::new())
    } else {
        Arc::new(OpaSink::new(&config.sink))
    };
    let source_config = config.source.clone();
    let fleet = Fleet::spawn(&config.resources, &config.backoff, sink, |resource| {
        Arc::new(KubeSource::new(&source_config, resource.clone())) as Arc<dyn ResourceSource>
    });

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(4);
    let ctx = ControlContext {
        socket: socket.clone(),
        board: fleet.status_board(),
        shutdown_tx: shutdown_tx.clone(),
        started_at_unix: unix_seconds_now(),
        dry_run,
    };

    let mut tasks = JoinSet::new();
    tasks.spawn(serve_control(listener, ctx, shutdown_tx.subscribe()));
    tasks.spawn(forward_ctrl_c(shutdown_tx.clone(), shutdown_tx.subscribe()));
    tracing::info!(
        workers = fleet.len(),
        socket = %socket.display(),
        dry_run,
        "daemon started",
    );

    let mut failure = None;
    tokio::select! {
        _ = shutdown_rx.recv() => {}
        Some(joined) = tasks.join_next() => failure = task_failure(joined),
    }
    let _ = shutdown_tx.send(());

    tracing::info!(workers = fleet.len(), "stopping sync workers");
    fleet.shutdown().await;
    while let Some(joined) = tasks.join_next().await {
        if let Some(err) = task_failure(joined) {
            failure.get_or_insert(err);
        }
    }

    if let Err(err) = fs::remove_file(&socket) {
        if err.kind() != ErrorKind::NotFound {
            tracing::warn!(socket = %socket.display(), error = %err, "could not remove control socket");
        }
    }
    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn task_failure(joined: Result<Result<(), DaemonError>, JoinError>) -> Option<DaemonError> {
    match joined {
        Ok(Ok(())) => None,
        Ok(Err(err)) => {
            tracing::error!(error = %err, "control task failed");
            Some(err)
        }
        Err(err) => Some(DaemonError::Protocol(format!("control task panicked: {err}"))),
    }
}

/// Bind the control socket with owner-only permissions. Refuses when another
/// daemon answers on it; a file left behind by a dead daemon is replaced.
fn bind_control_socket(socket: &Path) -> Result<UnixListener, DaemonError> {
    if StdUnixStream::connect(socket).is_ok() {
        return Err(DaemonError::AlreadyRunning {
            socket: socket.to_path_buf(),
        });
    }
    match fs::remove_file(socket) {
        Ok(()) => tracing::warn!(socket = %socket.display(), "replaced stale control socket"),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(io_err(socket, err)),
    }

    let listener = UnixListener::bind(socket).map_err(|e| io_err(socket, e))?;
    fs::set_permissions(socket, fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(socket, e))?;
    Ok(listener)
}

async fn serve_control(
    listener: UnixListener,
    ctx: ControlContext,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => return Ok(()),
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&ctx.socket, e))?;
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(err) = serve_client(stream, ctx).await {
                        tracing::warn!(error = %err, "control client dropped");
                    }
                });
            }
        }
    }
}

async fn forward_ctrl_c(
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    tokio::select! {
        _ = shutdown_rx.recv() => Ok(()),
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|e| io_err("ctrl-c handler", e))?;
            tracing::info!("received ctrl-c, shutting down");
            let _ = shutdown_tx.send(());
            Ok(())
        }
    }
}

/// Answer requests on one connection until the peer hangs up or asks to stop.
async fn serve_client(stream: UnixStream, ctx: ControlContext) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err(&ctx.socket, e))?
    {
        if line.trim().is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<ControlRequest>(&line) {
            Ok(ControlRequest::Status) => ControlResponse::Status(ctx.status()),
            Ok(ControlRequest::Stop) => {
                tracing::info!("stop requested over control socket");
                let _ = ctx.shutdown_tx.send(());
                ControlResponse::Stopping
            }
            Err(err) => ControlResponse::Error {
                message: format!("unrecognized request: {err}"),
            },
        };
        send_reply(&mut writer, &ctx.socket, &reply).await?;
        if reply == ControlResponse::Stopping {
            break;
        }
    }
    Ok(())
}

async fn send_reply(
    writer: &mut OwnedWriteHalf,
    socket: &Path,
    reply: &ControlResponse,
) -> Result<(), DaemonError> {
    let mut line = serde_json::to_vec(reply)?;
    line.push(b'\n');
    writer.write_all(&line).await.map_err(|e| io_err(socket, e))
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// `RUST_LOG` filters (default `info`).
fn init_tracing(format: LogFormat) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter);
    let _ = match format {
        LogFormat::Text => builder.with_target(false).try_init(),
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    use kubesync_core::{BackoffConfig, ResourceType, SourceConfig};
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn context(home: &Path, resources: &[ResourceType]) -> (ControlContext, Fleet) {
        let sink: Arc<dyn DataSink> = Arc::new(MemorySink::new());
        let source_config = SourceConfig {
            api_server: "http://127.0.0.1:9".into(),
            token_file: None,
            timeout_secs: 1,
        };
        let fleet = Fleet::spawn(resources, &BackoffConfig::default(), sink, |rt| {
            Arc::new(KubeSource::new(&source_config, rt.clone())) as Arc<dyn ResourceSource>
        });
        let (shutdown_tx, _) = broadcast::channel(4);
        let ctx = ControlContext {
            socket: socket_path(home),
            board: fleet.status_board(),
            shutdown_tx,
            started_at_unix: 1_000_000,
            dry_run: true,
        };
        (ctx, fleet)
    }

    async fn exchange(stream: &mut UnixStream, request: &str) -> Value {
        stream
            .write_all(format!("{request}\n").as_bytes())
            .await
            .expect("write request");
        let mut line = String::new();
        BufReader::new(&mut *stream)
            .read_line(&mut line)
            .await
            .expect("read reply");
        serde_json::from_str(line.trim()).expect("decode reply")
    }

    #[tokio::test]
    async fn status_lists_every_worker_in_config_order() {
        let home = TempDir::new().expect("home");
        let resources = vec![
            ResourceType::new("", "v1", "nodes", false),
            ResourceType::new("", "v1", "pods", true),
        ];
        let (ctx, fleet) = context(home.path(), &resources);

        let status = ctx.status();
        assert!(status.dry_run);
        assert_eq!(status.started_at_unix, 1_000_000);
        assert_eq!(status.socket, socket_path(home.path()));
        let names: Vec<_> = status.workers.iter().map(|w| w.resource.as_str()).collect();
        assert_eq!(names, vec!["v1/nodes", "v1/pods"]);
        fleet.shutdown().await;
    }

    #[tokio::test]
    async fn client_connection_serves_status_rejects_garbage_and_stops() {
        let home = TempDir::new().expect("home");
        let (ctx, _fleet) = context(home.path(), &[]);
        let mut shutdown_rx = ctx.shutdown_tx.subscribe();

        let (mut client, server) = UnixStream::pair().expect("socket pair");
        let handler = tokio::spawn(serve_client(server, ctx));

        let status = exchange(&mut client, r#"{"cmd":"status"}"#).await;
        assert_eq!(status["reply"], json!("status"));
        assert_eq!(status["workers"], json!([]));

        let garbage = exchange(&mut client, "not json").await;
        assert_eq!(garbage["reply"], json!("error"));

        let unknown = exchange(&mut client, r#"{"cmd":"resync"}"#).await;
        assert_eq!(unknown["reply"], json!("error"));
        assert!(unknown["message"].as_str().unwrap_or("").contains("resync"));

        let stop = exchange(&mut client, r#"{"cmd":"stop"}"#).await;
        assert_eq!(stop, json!({"reply": "stopping"}));
        shutdown_rx.recv().await.expect("shutdown broadcast");
        handler.await.expect("join").expect("client served");
    }

    #[tokio::test]
    async fn live_socket_is_not_taken_over() {
        let home = TempDir::new().expect("home");
        let socket = home.path().join("ctl.sock");
        let _first = bind_control_socket(&socket).expect("first bind");

        let err = bind_control_socket(&socket).unwrap_err();
        assert!(matches!(err, DaemonError::AlreadyRunning { .. }), "got: {err}");
    }

    #[tokio::test]
    async fn stale_socket_file_is_replaced_owner_only() {
        let home = TempDir::new().expect("home");
        let socket = home.path().join("ctl.sock");
        fs::write(&socket, b"").expect("stale file");

        let _listener = bind_control_socket(&socket).expect("bind over stale file");
        let mode = fs::metadata(&socket).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("text".parse::<LogFormat>(), Ok(LogFormat::Text));
        assert!("yaml".parse::<LogFormat>().is_err());
    }
}
