//! kubesync daemon: HTTP collaborators, one sync worker per resource type,
//! and a control socket.

mod error;
pub mod fleet;
pub mod kube;
pub mod opa;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use fleet::{Fleet, StatusBoard};
pub use kube::KubeSource;
pub use opa::OpaSink;
pub use protocol::{ControlClient, ControlRequest, ControlResponse, StatusPayload};
pub use runtime::{run, start_blocking, LogFormat, RunOptions};
