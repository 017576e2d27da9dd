//! Edge agent: reads keypoint frames, scores attention, and uploads signals.

use anyhow::{Context, Result};
use classvision::{
    app::{EdgeApp, NdjsonFrameSource},
    batcher::OverflowPolicy,
    config::Config,
    uploader::HttpTransport,
};
use clap::Parser;
use log::info;
use std::fs::File;
use std::io::{self, BufReader};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Keypoint frames as NDJSON (reads stdin when omitted or "-")
    #[arg(short, long)]
    input: Option<String>,

    /// Collector base URL
    #[arg(long, env = "API_BASE")]
    api_base: Option<String>,

    /// Session the signals belong to
    #[arg(short, long, env = "SESSION_ID")]
    session_id: Option<String>,

    /// Flush cadence in milliseconds
    #[arg(long)]
    flush_ms: Option<u64>,

    /// Upload request timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Maximum signals held while the collector is unreachable
    #[arg(long)]
    max_pending: Option<usize>,

    /// Overflow policy when the pending limit is reached (drop_oldest, reject_new)
    #[arg(long)]
    overflow: Option<String>,

    /// Assign zones as a row-major grid with this many columns
    #[arg(long)]
    grid_columns: Option<usize>,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,

    /// Path to configuration file (YAML format)
    #[arg(short = 'C', long)]
    config: Option<String>,
}

fn main() -> Result<()> {
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

    if let Some(api_base) = args.api_base {
        config.edge.api_base = api_base;
    }
    if let Some(session_id) = args.session_id {
        config.edge.session_id = session_id;
    }
    if let Some(flush_ms) = args.flush_ms {
        config.edge.flush_interval_ms = flush_ms;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.edge.request_timeout_ms = timeout_ms;
    }
    if let Some(max_pending) = args.max_pending {
        config.edge.max_pending = max_pending;
    }
    if let Some(overflow) = args.overflow.as_deref() {
        config.edge.overflow_policy = match overflow {
            "drop_oldest" => OverflowPolicy::DropOldest,
            "reject_new" => OverflowPolicy::RejectNew,
            other => anyhow::bail!("unknown overflow policy: {other}"),
        };
    }
    if args.grid_columns.is_some() {
        config.edge.grid_columns = args.grid_columns;
    }
    config.edge.validate()?;

    info!(
        "Edge agent posting to {} as session {}",
        config.edge.api_base, config.edge.session_id
    );

    let transport = Arc::new(HttpTransport::from_config(&config.edge)?);
    let mut app = EdgeApp::new(&config, transport)?;

    let summary = match args.input.as_deref() {
        None | Some("-") => app.run(&mut NdjsonFrameSource::new(io::stdin().lock()))?,
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening {path}"))?;
            app.run(&mut NdjsonFrameSource::new(BufReader::new(file)))?
        }
    };

    let stats = app.shutdown();
    info!(
        "Done: {} frames, {} signals queued, {} delivered, {} abandoned",
        summary.frames, summary.signals, stats.delivered, stats.abandoned
    );

    Ok(())
}
