//! Collection service for attention signals.

use anyhow::{Context, Result};
use classvision::{
    collector::{server, Collector},
    config::Config,
};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short, long, env = "COLLECTOR_LISTEN")]
    listen: Option<String>,

    /// Directory for per-session logs
    #[arg(long, env = "DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,

    /// Path to configuration file (YAML format)
    #[arg(short = 'C', long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.debug {
        env_logger::init_from_env(env_logger::Env::new().default_filter_or("debug"));
    } else {
        env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    }

    let mut config = if let Some(config_path) = &args.config {
        info!("Loading configuration from: {}", config_path);
        Config::from_file(config_path).with_context(|| format!("loading {config_path}"))?
    } else {
        Config::default()
    };
    if let Some(listen) = args.listen {
        config.collector.listen_addr = listen;
    }
    if let Some(data_dir) = args.data_dir {
        config.collector.data_dir = data_dir;
    }

    let listen_addr = config.collector.listen_addr.clone();
    let collector = Arc::new(Collector::new(config.collector)?);
    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("binding {listen_addr}"))?;

    server::serve(listener, collector, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown requested");
    })
    .await?;

    Ok(())
}
