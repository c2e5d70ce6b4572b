//! stacksink CLI — run the event server, export and replay the raw log.
//!
//! Usage:
//! ```bash
//! stacksink run
//! stacksink export-events --file events.tsv [--overwrite]
//! stacksink import-events --file events.tsv [--mode archival|pruned] [--force] [--wipe-db]
//! ```
//!
//! Configuration comes from the environment: STACKS_CORE_EVENT_HOST,
//! STACKS_CORE_EVENT_PORT, STACKS_CHAIN_ID, STACKS_API_MODE and
//! DATABASE_URL (omit the latter for the in-memory store).

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::warn;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stacksink_core::{IngestConfig, IngestStore};
use stacksink_server::replay::{export_tsv, replay_tsv, ReplayMode, ReplayOptions};
use stacksink_storage::{MemoryStore, PgStore};

#[tokio::main]
async fn main() {
    init_tracing();
    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(err) = run(&args).await {
        eprintln!("stacksink: {err:#}");
        process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

async fn run(args: &[String]) -> anyhow::Result<()> {
    match args.first().map(String::as_str) {
        None | Some("run") => cmd_run().await,
        Some("export-events") => cmd_export(&args[1..]).await,
        Some("import-events") => cmd_import(&args[1..]).await,
        Some("help" | "--help" | "-h") => {
            print_usage();
            Ok(())
        }
        Some("version" | "--version" | "-V") => {
            println!("stacksink {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(other) => {
            print_usage();
            bail!("unknown command: {other}");
        }
    }
}

fn print_usage() {
    println!("stacksink {}", env!("CARGO_PKG_VERSION"));
    println!("Event ingestion core for a Stacks-chain indexer\n");
    println!("USAGE:");
    println!("    stacksink <COMMAND>\n");
    println!("COMMANDS:");
    println!("    run             Start the event server (default)");
    println!("    export-events   Write the raw event log to a TSV file");
    println!("                      --file <path> [--overwrite]");
    println!("    import-events   Replay a TSV export into the store");
    println!("                      --file <path> [--mode archival|pruned] [--force] [--wipe-db]");
    println!("    version         Print version");
    println!("    help            Print this help");
}

async fn open_store(config: &IngestConfig) -> anyhow::Result<Arc<dyn IngestStore>> {
    match &config.db_url {
        Some(url) => {
            let store = PgStore::connect(url)
                .await
                .context("connecting to postgres")?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set; using the in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn cmd_run() -> anyhow::Result<()> {
    let config = IngestConfig::from_env()?;
    let store = open_store(&config).await?;
    stacksink_server::serve(config, store).await?;
    Ok(())
}

/// Pull `--flag <value>` out of an argument list.
fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn flag_present(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

async fn cmd_export(args: &[String]) -> anyhow::Result<()> {
    let file = PathBuf::from(
        flag_value(args, "--file").context("export-events requires --file <path>")?,
    );
    let config = IngestConfig::from_env()?;
    let store = open_store(&config).await?;
    let count = export_tsv(store.as_ref(), &file, flag_present(args, "--overwrite")).await?;
    println!("exported {count} raw event(s) to {}", file.display());
    Ok(())
}

async fn cmd_import(args: &[String]) -> anyhow::Result<()> {
    let file = PathBuf::from(
        flag_value(args, "--file").context("import-events requires --file <path>")?,
    );
    let mode = match flag_value(args, "--mode").as_deref() {
        None | Some("archival") => ReplayMode::Archival,
        Some("pruned") => ReplayMode::Pruned,
        Some(other) => bail!("--mode {other:?} is not one of archival/pruned"),
    };
    let config = IngestConfig::from_env()?;
    let store = open_store(&config).await?;
    let summary = replay_tsv(
        &file,
        store,
        config.chain_id,
        ReplayOptions {
            mode,
            force: flag_present(args, "--force"),
            wipe: flag_present(args, "--wipe-db"),
        },
    )
    .await?;
    println!(
        "replayed {} event(s); pruned {} raw row(s)",
        summary.replayed, summary.pruned_raw_rows
    );
    Ok(())
}
