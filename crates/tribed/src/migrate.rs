use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index if missing. Safe to run repeatedly.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    // Content, one row per canonical URL
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS contents (
            id TEXT PRIMARY KEY,
            source_type TEXT NOT NULL,
            source_id TEXT NOT NULL,
            title TEXT NOT NULL,
            body_summary TEXT NOT NULL,
            url TEXT NOT NULL,
            published_at TEXT NOT NULL,
            tags_json TEXT NOT NULL DEFAULT '[]',
            tribe_ids_json TEXT NOT NULL DEFAULT '[]',
            embedding BLOB,
            embedding_version TEXT,
            status TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tribes (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            prompt TEXT NOT NULL,
            tags_json TEXT NOT NULL DEFAULT '[]',
            members_json TEXT NOT NULL DEFAULT '[]',
            follower_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            user_ref TEXT PRIMARY KEY,
            followed_json TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Snapshots are write-once
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS share_snapshots (
            share_id TEXT PRIMARY KEY,
            owner_ref TEXT NOT NULL,
            prompt TEXT NOT NULL,
            feed_json TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_contents_status ON contents(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_contents_published ON contents(published_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_snapshots_owner ON share_snapshots(owner_ref)")
        .execute(pool)
        .await?;

    Ok(())
}
