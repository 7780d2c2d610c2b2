//! `tribed index stats|rebuild|compact`.

use anyhow::Result;

use crate::app;
use crate::config::Config;

pub async fn run_stats(config: &Config, json: bool) -> Result<()> {
    let engine = app::open_engine(config).await?;
    let stats = engine.stats().await;
    app::close(engine).await;
    let stats = stats?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    println!("index");
    println!("  embedding_version: {}", stats.embedding_version);
    println!("  state: {:?}", stats.index.state);
    println!("  dims: {}", stats.index.dims);
    println!("  live: {}", stats.index.live);
    println!("  tombstones: {}", stats.index.tombstones);
    println!("contents");
    for (status, count) in &stats.contents_by_status {
        println!("  {}: {}", status, count);
    }
    println!("tribes: {}", stats.tribes);
    Ok(())
}

/// Re-embed anything stale and rebuild from scratch.
pub async fn run_rebuild(config: &Config) -> Result<()> {
    let engine = app::open_engine(config).await?;
    let summary = engine.rebuild_index().await;
    app::close(engine).await;
    let summary = summary?;

    println!("index rebuild");
    println!("  version: {}", summary.version);
    println!("  indexed: {}", summary.indexed);
    println!("  re-embedded: {}", summary.re_embedded);
    println!("  embedding failed: {}", summary.embedding_failed);
    println!("  corrupted: {}", summary.corrupted.len());
    for id in &summary.corrupted {
        println!("    {}", id);
    }
    Ok(())
}

/// Drop tombstones from the loaded index. The long-running server also
/// does this on a timer.
pub async fn run_compact(config: &Config) -> Result<()> {
    let engine = app::open_engine(config).await?;
    let removed = engine.compact_index();
    app::close(engine).await;

    println!("index compact");
    println!("  tombstones removed: {}", removed?);
    Ok(())
}
