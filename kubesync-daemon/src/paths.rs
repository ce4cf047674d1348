use std::path::{Path, PathBuf};

pub const DAEMON_SOCKET: &str = "kubesync.sock";

pub fn kubesync_root(home: &Path) -> PathBuf {
    home.join(".kubesync")
}

pub fn socket_path(home: &Path) -> PathBuf {
    kubesync_root(home).join(DAEMON_SOCKET)
}
