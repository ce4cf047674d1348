//! `kubesync run` / `kubesync stop`: foreground daemon lifecycle.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use kubesync_daemon::{start_blocking, ControlClient, DaemonError, LogFormat, RunOptions};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Config file to load instead of `~/.kubesync/config.yaml`.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Mirror into an in-process store instead of the configured sink.
    #[arg(long)]
    pub dry_run: bool,

    /// Log line format: text or json. Defaults to `KUBESYNC_LOG_FORMAT`, then text.
    #[arg(long)]
    pub log_format: Option<LogFormat>,
}

impl RunArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let options = RunOptions {
            config_path: self.config,
            dry_run: self.dry_run,
            log_format: self.log_format,
        };
        start_blocking(&home, options).context("daemon exited with error")
    }
}

pub fn stop() -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    match ControlClient::new(&home).stop() {
        Ok(()) => println!("daemon stop requested"),
        Err(DaemonError::DaemonNotRunning { .. }) => println!("daemon is not running"),
        Err(err) => return Err(err).context("failed to stop daemon"),
    }
    Ok(())
}
