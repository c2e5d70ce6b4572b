//! Raw event log export and replay.
//!
//! Export streams every raw record in ascending sequence to a tab-separated
//! file; replay re-posts each record in order through the router against a
//! fresh store. Together they are the disaster-recovery and reindex path:
//! a replayed store is equivalent to the original, minus locally stamped
//! timestamps.

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tower::ServiceExt;
use tracing::{info, warn};

use stacksink_core::{IngestError, IngestStore};

use crate::AppState;

/// First line of every export file.
pub const TSV_HEADER: &str = "# stacks-event-replay v1";

/// What to keep in the target store after replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayMode {
    /// Retain everything, including the re-recorded raw event rows.
    #[default]
    Archival,
    /// Drop the raw event rows once the replay has been applied.
    Pruned,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayOptions {
    pub mode: ReplayMode,
    /// Skip the non-empty-store safety check.
    pub force: bool,
    /// Wipe the target store before replaying.
    pub wipe: bool,
}

/// Export all raw records to `path` as `seq TAB path TAB payload` rows.
/// Refuses to overwrite an existing file unless `overwrite` is set.
/// Returns the number of records written.
pub async fn export_tsv(
    store: &dyn IngestStore,
    path: &Path,
    overwrite: bool,
) -> Result<u64, IngestError> {
    if path.exists() && !overwrite {
        return Err(IngestError::Config(format!(
            "refusing to overwrite {} (pass overwrite to allow)",
            path.display()
        )));
    }

    let file = tokio::fs::File::create(path)
        .await
        .map_err(|e| IngestError::Config(format!("create {}: {e}", path.display())))?;
    let mut writer = BufWriter::new(file);
    let io_err = |e: std::io::Error| IngestError::Config(format!("write {}: {e}", path.display()));

    writer.write_all(TSV_HEADER.as_bytes()).await.map_err(io_err)?;
    writer.write_all(b"\n").await.map_err(io_err)?;

    let records = store.raw_event_requests().await?;
    let count = records.len() as u64;
    for record in records {
        // Compact JSON never contains raw tabs or newlines.
        let line = format!("{}\t{}\t{}\n", record.seq, record.path, record.payload);
        writer.write_all(line.as_bytes()).await.map_err(io_err)?;
    }
    writer.flush().await.map_err(io_err)?;
    info!(count, file = %path.display(), "exported raw event log");
    Ok(count)
}

/// Summary of one replay run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub replayed: u64,
    pub pruned_raw_rows: u64,
}

/// Replay a TSV export into `store`, posting each record in order through
/// an in-process router.
pub async fn replay_tsv(
    tsv_path: &Path,
    store: Arc<dyn IngestStore>,
    chain_id: u32,
    opts: ReplayOptions,
) -> Result<ReplaySummary, IngestError> {
    if opts.wipe {
        warn!("wiping target store before replay");
        store.wipe().await?;
    }
    if !opts.force && !store.is_empty().await? {
        return Err(IngestError::Config(
            "target store is not empty (pass force to replay anyway)".into(),
        ));
    }

    let app = crate::router(AppState::new(Arc::clone(&store), chain_id));

    let file = tokio::fs::File::open(tsv_path)
        .await
        .map_err(|e| IngestError::Config(format!("open {}: {e}", tsv_path.display())))?;
    let mut lines = BufReader::new(file).lines();

    let header = lines
        .next_line()
        .await
        .map_err(|e| IngestError::Config(format!("read {}: {e}", tsv_path.display())))?;
    if header.as_deref() != Some(TSV_HEADER) {
        return Err(IngestError::Config(format!(
            "{} is not a raw event export (bad header)",
            tsv_path.display()
        )));
    }

    let mut replayed = 0u64;
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| IngestError::Config(format!("read {}: {e}", tsv_path.display())))?
    {
        if line.is_empty() {
            continue;
        }
        let mut fields = line.splitn(3, '\t');
        let (Some(seq), Some(path), Some(payload)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(IngestError::decode(
                "replay record",
                format!("malformed TSV line: {line:?}"),
            ));
        };

        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload.to_string()))
            .map_err(|e| IngestError::decode("replay record", e.to_string()))?;
        let response = app
            .clone()
            .oneshot(request)
            .await
            .map_err(|e| IngestError::decode("replay record", e.to_string()))?;
        if response.status() != StatusCode::OK {
            return Err(IngestError::decode(
                "replay record",
                format!("seq {seq} to {path} returned {}", response.status()),
            ));
        }
        replayed += 1;
    }

    let pruned_raw_rows = match opts.mode {
        ReplayMode::Archival => 0,
        ReplayMode::Pruned => store.prune_raw_event_requests().await?,
    };
    info!(replayed, pruned_raw_rows, "replay complete");
    Ok(ReplaySummary {
        replayed,
        pruned_raw_rows,
    })
}
