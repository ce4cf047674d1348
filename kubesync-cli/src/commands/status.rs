//! `kubesync status`: per-worker view of a running daemon.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::json;
use tabled::{settings::Style, Table, Tabled};

use kubesync_daemon::{ControlClient, DaemonError, StatusPayload};
use kubesync_sync::{WorkerState, WorkerStatus};

/// Arguments for `kubesync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct WorkerRow {
    #[tabled(rename = "resource")]
    resource: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "cycles")]
    cycles: u64,
    #[tabled(rename = "retry in")]
    retry: String,
    #[tabled(rename = "last error")]
    last_error: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let client = ControlClient::new(&home);

        let status = match client.status() {
            Ok(status) => Some(status),
            Err(DaemonError::DaemonNotRunning { .. }) => None,
            Err(err) => return Err(err).context("failed to query daemon status"),
        };

        if self.json {
            let mut report = match &status {
                Some(status) => {
                    serde_json::to_value(status).context("failed to encode daemon status")?
                }
                None => json!({ "socket": client.socket().display().to_string() }),
            };
            report["running"] = json!(status.is_some());
            println!(
                "{}",
                serde_json::to_string_pretty(&report)
                    .context("failed to render daemon status JSON")?
            );
            return Ok(());
        }

        match status {
            Some(status) => print_table(status),
            None => println!("daemon is not running"),
        }
        Ok(())
    }
}

fn print_table(status: StatusPayload) {
    let mode = if status.dry_run { " (dry run)" } else { "" };
    println!(
        "kubesync v{} | {} workers | {} backing off{mode}",
        env!("CARGO_PKG_VERSION"),
        status.workers.len(),
        status.backing_off(),
    );
    if status.workers.is_empty() {
        return;
    }

    let rows: Vec<WorkerRow> = status.workers.into_iter().map(worker_row).collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn worker_row(worker: WorkerStatus) -> WorkerRow {
    let retry = match worker.state {
        WorkerState::BackingOff => format!("{:.1}s", worker.retry_delay_ms as f64 / 1000.0),
        _ => "-".to_string(),
    };
    WorkerRow {
        resource: worker.resource,
        state: state_label(worker.state),
        cycles: worker.cycles,
        retry,
        last_error: worker.last_error.unwrap_or_else(|| "-".to_string()),
    }
}

fn state_label(state: WorkerState) -> String {
    match state {
        WorkerState::Starting => "STARTING".to_string(),
        WorkerState::Syncing => "SYNCING".green().bold().to_string(),
        WorkerState::BackingOff => "BACKING OFF".yellow().bold().to_string(),
        WorkerState::Stopped => "STOPPED".bright_black().to_string(),
    }
}
