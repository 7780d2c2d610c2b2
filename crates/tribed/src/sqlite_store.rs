//! SQLite-backed [`Store`] implementation.
//!
//! Sets (tags, tribe ids, members, followed tribes) are stored as JSON
//! arrays, embeddings as little-endian `f32` BLOBs and timestamps as
//! RFC 3339 text so rows round-trip without precision loss.

use std::collections::{BTreeSet, HashMap};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use tribed_core::embedding::{blob_to_vec, vec_to_blob};
use tribed_core::models::{Content, ContentStatus, ShareSnapshot, SourceType, Tribe, UserContext};
use tribed_core::store::Store;

/// Ids per `IN (...)` lookup, well under SQLite's bound-variable limit.
const LOOKUP_CHUNK: usize = 500;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("bad timestamp in database: {}", raw))?
        .with_timezone(&Utc))
}

fn parse_set(raw: &str) -> Result<BTreeSet<String>> {
    serde_json::from_str(raw).with_context(|| format!("bad JSON set in database: {}", raw))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

const CONTENT_COLUMNS: &str = "id, source_type, source_id, title, body_summary, url, published_at, \
     tags_json, tribe_ids_json, embedding, embedding_version, status, content_hash, updated_at";

fn row_to_content(row: &SqliteRow) -> Result<Content> {
    let id: String = row.get("id");
    let source_type: String = row.get("source_type");
    let status: String = row.get("status");
    let status = ContentStatus::parse(&status)
        .with_context(|| format!("unknown status {:?} for content {}", status, id))?;
    let blob: Option<Vec<u8>> = row.get("embedding");
    let embedding = blob.map(|b| {
        // An undecodable blob is kept as an empty vector: the next index
        // rebuild reports it as corrupted and queues it for re-embedding.
        blob_to_vec(&b).unwrap_or_else(|| {
            tracing::warn!(id = %id, bytes = b.len(), "undecodable embedding blob");
            Vec::new()
        })
    });

    Ok(Content {
        source_type: source_type
            .parse::<SourceType>()
            .with_context(|| format!("unknown source type for content {}", id))?,
        source_id: row.get("source_id"),
        title: row.get("title"),
        body_summary: row.get("body_summary"),
        url: row.get("url"),
        published_at: parse_ts(row.get("published_at"))?,
        tags: parse_set(row.get("tags_json"))?,
        tribe_ids: parse_set(row.get("tribe_ids_json"))?,
        embedding,
        embedding_version: row.get("embedding_version"),
        status,
        content_hash: row.get("content_hash"),
        updated_at: parse_ts(row.get("updated_at"))?,
        id,
    })
}

fn row_to_tribe(row: &SqliteRow) -> Result<Tribe> {
    let follower_count: i64 = row.get("follower_count");
    Ok(Tribe {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        prompt: row.get("prompt"),
        tags: parse_set(row.get("tags_json"))?,
        member_content_ids: parse_set(row.get("members_json"))?,
        follower_count: follower_count.max(0) as u64,
        created_at: parse_ts(row.get("created_at"))?,
    })
}

fn row_to_snapshot(row: &SqliteRow) -> Result<ShareSnapshot> {
    let share_id: String = row.get("share_id");
    let feed_json: String = row.get("feed_json");
    Ok(ShareSnapshot {
        feed: serde_json::from_str(&feed_json)
            .with_context(|| format!("bad feed JSON for share {}", share_id))?,
        owner_ref: row.get("owner_ref"),
        prompt: row.get("prompt"),
        created_at: parse_ts(row.get("created_at"))?,
        share_id,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_content(&self, content: &Content) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO contents (id, source_type, source_id, title, body_summary, url,
                                  published_at, tags_json, tribe_ids_json, embedding,
                                  embedding_version, status, content_hash, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source_type = excluded.source_type,
                source_id = excluded.source_id,
                title = excluded.title,
                body_summary = excluded.body_summary,
                url = excluded.url,
                published_at = excluded.published_at,
                tags_json = excluded.tags_json,
                tribe_ids_json = excluded.tribe_ids_json,
                embedding = excluded.embedding,
                embedding_version = excluded.embedding_version,
                status = excluded.status,
                content_hash = excluded.content_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&content.id)
        .bind(content.source_type.as_str())
        .bind(&content.source_id)
        .bind(&content.title)
        .bind(&content.body_summary)
        .bind(&content.url)
        .bind(format_ts(&content.published_at))
        .bind(to_json(&content.tags)?)
        .bind(to_json(&content.tribe_ids)?)
        .bind(content.embedding.as_deref().map(vec_to_blob))
        .bind(&content.embedding_version)
        .bind(content.status.as_str())
        .bind(&content.content_hash)
        .bind(format_ts(&content.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_content(&self, id: &str) -> Result<Option<Content>> {
        let row = sqlx::query(&format!("SELECT {} FROM contents WHERE id = ?", CONTENT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_content).transpose()
    }

    async fn get_contents(&self, ids: &[String]) -> Result<Vec<Content>> {
        let mut found: HashMap<String, Content> = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(LOOKUP_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT {} FROM contents WHERE id IN ({})",
                CONTENT_COLUMNS, placeholders
            );
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(id);
            }
            for row in query.fetch_all(&self.pool).await? {
                let content = row_to_content(&row)?;
                found.insert(content.id.clone(), content);
            }
        }
        Ok(ids.iter().filter_map(|id| found.get(id).cloned()).collect())
    }

    async fn list_contents(&self) -> Result<Vec<Content>> {
        let rows = sqlx::query(&format!("SELECT {} FROM contents ORDER BY id", CONTENT_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_content).collect()
    }

    async fn upsert_tribe(&self, tribe: &Tribe) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tribes (id, name, description, prompt, tags_json, members_json,
                                follower_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                prompt = excluded.prompt,
                tags_json = excluded.tags_json,
                members_json = excluded.members_json,
                follower_count = excluded.follower_count
            "#,
        )
        .bind(&tribe.id)
        .bind(&tribe.name)
        .bind(&tribe.description)
        .bind(&tribe.prompt)
        .bind(to_json(&tribe.tags)?)
        .bind(to_json(&tribe.member_content_ids)?)
        .bind(i64::try_from(tribe.follower_count).unwrap_or(i64::MAX))
        .bind(format_ts(&tribe.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_tribe(&self, id: &str) -> Result<Option<Tribe>> {
        let row = sqlx::query("SELECT * FROM tribes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_tribe).transpose()
    }

    async fn list_tribes(&self) -> Result<Vec<Tribe>> {
        let rows = sqlx::query("SELECT * FROM tribes ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_tribe).collect()
    }

    async fn get_user(&self, user_ref: &str) -> Result<Option<UserContext>> {
        let row = sqlx::query("SELECT user_ref, followed_json FROM users WHERE user_ref = ?")
            .bind(user_ref)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(UserContext {
                user_ref: row.get("user_ref"),
                followed_tribes: parse_set(row.get("followed_json"))?,
            })),
            None => Ok(None),
        }
    }

    async fn upsert_user(&self, user: &UserContext) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (user_ref, followed_json) VALUES (?, ?)
            ON CONFLICT(user_ref) DO UPDATE SET followed_json = excluded.followed_json
            "#,
        )
        .bind(&user.user_ref)
        .bind(to_json(&user.followed_tribes)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_snapshot(&self, snapshot: &ShareSnapshot) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO share_snapshots (share_id, owner_ref, prompt, feed_json, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&snapshot.share_id)
        .bind(&snapshot.owner_ref)
        .bind(&snapshot.prompt)
        .bind(to_json(&snapshot.feed)?)
        .bind(format_ts(&snapshot.created_at))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_snapshot(&self, share_id: &str) -> Result<Option<ShareSnapshot>> {
        let row = sqlx::query("SELECT * FROM share_snapshots WHERE share_id = ?")
            .bind(share_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_snapshot).transpose()
    }
}
