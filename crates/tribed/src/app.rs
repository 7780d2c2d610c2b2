//! Engine construction shared by the CLI commands and the server.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};

use tribed_core::FeedEngine;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;
use crate::{db, embedding, migrate};

/// The engine as the binary runs it.
pub type Engine = FeedEngine<SqliteStore>;

/// Connect, migrate, build the embedder and load the index from the
/// stored vectors. The embedder is never called here; stale or failed
/// content waits for `embed pending`, `index rebuild` or the server's
/// startup pass.
pub async fn open_engine(config: &Config) -> Result<Engine> {
    let pool = db::connect(config).await?;
    migrate::migrate(&pool).await?;

    let embedder = embedding::create_embedder(&config.embedding)?;
    let engine = FeedEngine::new(
        Arc::new(SqliteStore::new(pool)),
        embedder,
        config.engine_config(),
    )?;

    let summary = engine.load_index().await?;
    tracing::debug!(
        version = %summary.version,
        indexed = summary.indexed,
        pending = summary.pending,
        corrupted = summary.corrupted.len(),
        "index loaded"
    );
    Ok(engine)
}

/// Close the pool after a one-shot command.
pub async fn close(engine: Engine) {
    engine.shutdown();
    engine.store().pool().close().await;
}

/// Parse a `YYYY-MM-DD` date as midnight UTC.
pub fn parse_date(raw: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| anyhow::anyhow!("invalid date '{}' (expected YYYY-MM-DD): {}", raw, e))?;
    Ok(date.and_time(chrono::NaiveTime::MIN).and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date() {
        let ts = parse_date("2024-03-01").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-01T00:00:00+00:00");
        assert!(parse_date("03/01/2024").is_err());
    }
}
