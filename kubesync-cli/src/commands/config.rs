//! `kubesync config`: locate and validate the daemon configuration.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use kubesync_core::config;

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Load and validate the config, then list the resource types it syncs.
    Check(CheckArgs),
    /// Print the default config location.
    Path,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Config file to check instead of `~/.kubesync/config.yaml`.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn run(command: ConfigCommand) -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;

    match command {
        ConfigCommand::Path => {
            println!("{}", config::config_path_at(&home).display());
        }
        ConfigCommand::Check(args) => {
            let path = args
                .config
                .unwrap_or_else(|| config::config_path_at(&home));
            let loaded = config::load_from(&path).context("config check failed")?;

            if args.json {
                let resources: Vec<String> =
                    loaded.resources.iter().map(ToString::to_string).collect();
                let payload = serde_json::json!({
                    "path": path.display().to_string(),
                    "source": loaded.source.api_server,
                    "sink": loaded.sink.url,
                    "root": loaded.sink.root,
                    "resources": resources,
                });
                println!(
                    "{}",
                    serde_json::to_string_pretty(&payload)
                        .context("failed to render config JSON")?
                );
                return Ok(());
            }

            println!("config ok: {}", path.display());
            println!("source: {}", loaded.source.api_server);
            println!("sink:   {} (root '{}')", loaded.sink.url, loaded.sink.root);
            for resource in &loaded.resources {
                let scope = if resource.namespaced {
                    "namespaced"
                } else {
                    "cluster"
                };
                println!("  {resource} -> {} [{scope}]", resource.storage_prefix());
            }
        }
    }

    Ok(())
}
