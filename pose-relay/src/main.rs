use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use pose_relay::{observability::init_tracing, Config, Server};

/// pose-relay - pair capture and display devices and relay pose frames
#[derive(Debug, Parser)]
#[command(name = "pose-relay")]
#[command(version, about, long_about = None)]
struct Args {
    /// Config file to load instead of the standard search paths
    #[arg(short, long, env = "POSE_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(long)]
    host: Option<String>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level or filter directive, e.g. `info` or `pose_relay=trace`
    #[arg(long)]
    log_level: Option<String>,

    /// Per-envelope debug diagnostics
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.service.host = host;
        }
        if let Some(port) = self.port {
            config.service.port = port;
        }
        if let Some(level) = self.log_level {
            config.service.log_level = level;
        }
        if self.verbose {
            config.service.verbose = true;
        }
        if self.json_logs {
            config.service.log_format = "json".to_string();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load().context("failed to load config")?,
    };
    args.apply(&mut config);

    init_tracing(&config)?;

    Server::new(config).serve().await?;

    Ok(())
}
