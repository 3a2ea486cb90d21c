//! Vigil CLI
//!
//! Command-line interface for the event-indexing engine:
//!
//! - `vigil ingest <log>`: index a tab-separated log and persist the
//!   index trees and schema.
//! - `vigil query <expr> [--log <log>]`: run one expression and print
//!   matching events as line-delimited JSON. The optional log
//!   re-materializes events into the in-memory archive; without it only
//!   statistics are meaningful.
//! - `vigil serve [--log <log>]`: expose `GET /?query=` over HTTP.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigil::archive::{ArchiveHandle, MemoryArchive, SinkMsg};
use vigil::config::Config;
use vigil::index::IndexHandle;
use vigil::query::Exporter;
use vigil::value::Schema;

#[derive(Parser)]
#[command(name = "vigil", version, about = "Event indexing and query engine")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index a tab-separated log file.
    Ingest {
        /// The log to read.
        log: PathBuf,
    },
    /// Evaluate one query expression and print matches.
    Query {
        /// The expression, e.g. ':addr in 10.0.0.0/8'.
        expr: String,

        /// Log file to materialize events from.
        #[arg(long)]
        log: Option<PathBuf>,

        /// Matches per batch.
        #[arg(long, default_value_t = 100)]
        batch_size: u64,
    },
    /// Serve the HTTP query endpoint.
    Serve {
        /// Log file to materialize events from.
        #[arg(long)]
        log: Option<PathBuf>,

        /// Listen address, overriding the config.
        #[arg(long)]
        listen: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "vigil=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load_or_default(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.data.dir = dir;
    }
    tracing::info!(dir = %config.data.dir.display(), "data directory");

    match cli.command {
        Command::Ingest { log } => ingest(&config, &log).await,
        Command::Query {
            expr,
            log,
            batch_size,
        } => query(&config, &expr, log.as_deref(), batch_size).await,
        Command::Serve { log, listen } => serve(&config, log.as_deref(), listen).await,
    }
}

async fn ingest(config: &Config, log: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
    let parsed = vigil::read_log_file(log, 1)?;
    tracing::info!(
        name = %parsed.name,
        events = parsed.events.len(),
        "parsed log"
    );

    let mut schema = Schema::load(&config.data.schema_path())?;
    schema.register(parsed.name.clone(), parsed.record_type.clone());
    schema.save(&config.data.schema_path())?;

    let index = vigil::index::actor::spawn(&config.data.index_dir());
    for event in parsed.events {
        index.index(event).await;
    }
    if !index.save().await {
        return Err("index save failed".into());
    }
    index.shutdown().await;
    tracing::info!("ingest complete");
    Ok(())
}

/// Bring up the archive + index pair, optionally re-materializing the
/// archive from a log file.
async fn setup(
    config: &Config,
    log: Option<&std::path::Path>,
) -> Result<(ArchiveHandle, IndexHandle, Schema), Box<dyn std::error::Error>> {
    let schema = Schema::load(&config.data.schema_path())?;
    let archive = MemoryArchive::spawn(config.query.chunk_size);
    let index = vigil::index::actor::spawn(&config.data.index_dir());
    if let Some(log) = log {
        let parsed = vigil::read_log_file(log, 1)?;
        tracing::info!(events = parsed.events.len(), "materialized archive");
        archive.store(parsed.events).await;
    }
    Ok((archive, index, schema))
}

async fn query(
    config: &Config,
    expr: &str,
    log: Option<&std::path::Path>,
    batch_size: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let (archive, index, schema) = setup(config, log).await?;

    let (sink_tx, mut sink_rx) = mpsc::channel(256);
    let exporter = Exporter::spawn(archive, index.clone(), sink_tx, expr, &schema)?;
    exporter.set_batch_size(batch_size).await;
    exporter.start().await;

    let mut emitted = 0u64;
    while let Some(msg) = sink_rx.recv().await {
        match msg {
            SinkMsg::Created(id) => tracing::debug!(%id, "query created"),
            SinkMsg::Event(event) => {
                println!("{}", serde_json::to_string(&event)?);
                emitted += 1;
                if emitted % batch_size == 0 {
                    exporter.next_chunk().await;
                }
            }
            SinkMsg::Error { message, .. } => {
                tracing::error!(%message, "query failed");
                break;
            }
            SinkMsg::Done { runtime, .. } => {
                let stats = exporter.statistics().await.unwrap_or_default();
                tracing::info!(
                    processed = stats.processed,
                    matched = stats.matched,
                    ?runtime,
                    "query done"
                );
                break;
            }
        }
    }
    exporter.shutdown().await;
    index.shutdown().await;
    Ok(())
}

async fn serve(
    config: &Config,
    log: Option<&std::path::Path>,
    listen: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (archive, index, schema) = setup(config, log).await?;
    let state = vigil::api::AppState {
        archive,
        index,
        schema: Arc::new(schema),
        batch_size: config.query.batch_size,
    };
    let addr = listen.unwrap_or_else(|| config.api.addr());
    vigil::api::serve(state, &addr).await?;
    Ok(())
}
