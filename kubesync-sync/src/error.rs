//! Failure taxonomy for a reconciliation cycle.
//!
//! Every failed cycle is exactly one of: the remote source failed, the local
//! sink failed, or the watch channel closed. The retry policy keys off
//! [`SyncError::kind`] alone.

use std::fmt;

use thiserror::Error;

use kubesync_core::IdentityError;

/// Failure reported by the remote list/watch API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// Connection, TLS, or read failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The API answered with a non-success status.
    #[error("API returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// The response body could not be understood.
    #[error("decode error: {0}")]
    Decode(String),

    /// An explicit error event on the watch stream.
    #[error("remote error: {0}")]
    Remote(String),
}

/// Failure reported by the local data sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("sink returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// The object could not be mapped to a storage path.
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),
}

/// Outcome of a cycle that did not end with a graceful stop.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("source error ({context}): {source}")]
    Source {
        context: &'static str,
        #[source]
        source: SourceError,
    },

    #[error("sink error ({context}): {source}")]
    Sink {
        context: &'static str,
        #[source]
        source: SinkError,
    },

    #[error("channel closed")]
    ChannelClosed,
}

/// Classification used to pick a retry delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Source,
    Sink,
    ChannelClosed,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Source => write!(f, "source"),
            FailureKind::Sink => write!(f, "sink"),
            FailureKind::ChannelClosed => write!(f, "channel closed"),
        }
    }
}

impl SyncError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SyncError::Source { .. } => FailureKind::Source,
            SyncError::Sink { .. } => FailureKind::Sink,
            SyncError::ChannelClosed => FailureKind::ChannelClosed,
        }
    }
}

/// Convenience constructor for [`SyncError::Source`].
pub(crate) fn source_err(context: &'static str, source: SourceError) -> SyncError {
    SyncError::Source { context, source }
}

/// Convenience constructor for [`SyncError::Sink`].
pub(crate) fn sink_err(context: &'static str, source: SinkError) -> SyncError {
    SyncError::Sink { context, source }
}
