//! Control socket wire format and its blocking client.
//!
//! One JSON object per line in each direction, one reply per request:
//!
//! | request            | reply                                   |
//! |--------------------|-----------------------------------------|
//! | `{"cmd":"status"}` | `{"reply":"status", ...StatusPayload}`  |
//! | `{"cmd":"stop"}`   | `{"reply":"stopping"}`                  |
//! | anything else      | `{"reply":"error","message":"..."}`     |

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use kubesync_sync::{WorkerState, WorkerStatus};

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// How long the client waits for the daemon to answer.
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlRequest {
    Status,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum ControlResponse {
    Status(StatusPayload),
    Stopping,
    Error { message: String },
}

/// What a running daemon reports about itself and its workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub dry_run: bool,
    pub started_at_unix: u64,
    pub socket: PathBuf,
    /// One entry per configured resource type, in config order.
    pub workers: Vec<WorkerStatus>,
}

impl StatusPayload {
    /// Workers currently waiting out a retry delay.
    pub fn backing_off(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| w.state == WorkerState::BackingOff)
            .count()
    }
}

/// Talks to the daemon listening under a given home directory. Every call
/// uses a fresh connection.
#[derive(Debug, Clone)]
pub struct ControlClient {
    socket: PathBuf,
}

impl ControlClient {
    pub fn new(home: &Path) -> Self {
        Self {
            socket: socket_path(home),
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    pub fn status(&self) -> Result<StatusPayload, DaemonError> {
        match self.call(ControlRequest::Status)? {
            ControlResponse::Status(payload) => Ok(payload),
            other => Err(unexpected(other)),
        }
    }

    /// Ask the daemon to stop every worker and exit. Returns once the request
    /// is acknowledged, not when the daemon has exited.
    pub fn stop(&self) -> Result<(), DaemonError> {
        match self.call(ControlRequest::Stop)? {
            ControlResponse::Stopping => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub fn call(&self, request: ControlRequest) -> Result<ControlResponse, DaemonError> {
        let stream = self.connect()?;
        stream
            .set_read_timeout(Some(REPLY_TIMEOUT))
            .map_err(|e| io_err(&self.socket, e))?;

        let mut line = serde_json::to_vec(&request)?;
        line.push(b'\n');
        (&stream)
            .write_all(&line)
            .map_err(|e| io_err(&self.socket, e))?;

        let mut reply = String::new();
        let read = BufReader::new(&stream)
            .read_line(&mut reply)
            .map_err(|e| io_err(&self.socket, e))?;
        if read == 0 {
            return Err(DaemonError::Protocol(
                "daemon closed the connection without replying".into(),
            ));
        }
        Ok(serde_json::from_str(reply.trim_end())?)
    }

    fn connect(&self) -> Result<UnixStream, DaemonError> {
        UnixStream::connect(&self.socket).map_err(|err| match err.kind() {
            ErrorKind::NotFound | ErrorKind::ConnectionRefused => DaemonError::DaemonNotRunning {
                socket: self.socket.clone(),
            },
            _ => io_err(&self.socket, err),
        })
    }
}

fn unexpected(reply: ControlResponse) -> DaemonError {
    match reply {
        ControlResponse::Error { message } => DaemonError::Protocol(message),
        other => DaemonError::Protocol(format!("unexpected reply: {other:?}")),
    }
}
