//! Reload pipeline orchestration.
//!
//! Coordinates the full rebuild: load → normalize → chunk → embed → replace.
//! Replacement deletes every vector tagged with the configured source label
//! before upserting, so the index reflects the input file rather than
//! accumulating stale chunks.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::info;

use crate::chunk::chunk_incidents;
use crate::config::Config;
use crate::loader::load_incidents;
use crate::store::VectorStore;

/// Counts from one reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadStats {
    pub records: usize,
    pub chunks: usize,
    pub indexed: usize,
}

/// Rebuild the index for `[data].source` from `[data].path`.
pub async fn reload(config: &Config, store: &VectorStore) -> Result<ReloadStats> {
    let records = load_incidents(
        &config.data.path,
        Duration::from_secs(config.data.timeout_secs),
    )
    .await?;

    let chunks = chunk_incidents(&records, &config.data.source, config.chunking.max_tokens);
    let indexed = store
        .replace_source(&config.data.source, &chunks)
        .await
        .context("failed to rebuild vector index")?;

    let stats = ReloadStats {
        records: records.len(),
        chunks: chunks.len(),
        indexed,
    };
    info!(
        path = %config.data.path,
        records = stats.records,
        chunks = stats.chunks,
        "reload complete"
    );
    Ok(stats)
}

/// CLI entry: reload and print a summary.
pub async fn run_reload(config: &Config, store: &VectorStore) -> Result<ReloadStats> {
    let stats = reload(config, store).await?;
    println!("reload {}", config.data.path);
    println!("  incidents loaded: {}", stats.records);
    println!("  indexed chunks: {}", stats.indexed);
    println!();
    Ok(stats)
}
