//! Core data models used throughout Tribed.
//!
//! These types represent the content, tribes, feeds and share snapshots that
//! flow through the ingestion and ranking pipeline. Sets are `BTreeSet`s so
//! that serialization and iteration order are stable.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IngestionError;

/// Origin of a piece of content. Unknown source types are rejected at the
/// ingestion boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Reddit,
    Youtube,
    Medium,
    Podcast,
    Github,
    Rss,
    Web,
}

impl SourceType {
    pub const ALL: [SourceType; 7] = [
        SourceType::Reddit,
        SourceType::Youtube,
        SourceType::Medium,
        SourceType::Podcast,
        SourceType::Github,
        SourceType::Rss,
        SourceType::Web,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Reddit => "reddit",
            SourceType::Youtube => "youtube",
            SourceType::Medium => "medium",
            SourceType::Podcast => "podcast",
            SourceType::Github => "github",
            SourceType::Rss => "rss",
            SourceType::Web => "web",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = IngestionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        SourceType::ALL
            .into_iter()
            .find(|t| t.as_str() == lowered)
            .ok_or_else(|| IngestionError::UnknownSourceType(s.to_string()))
    }
}

/// Lifecycle state of a [`Content`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Normalized,
    Embedded,
    Indexed,
    EmbeddingFailed,
    Retired,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Normalized => "normalized",
            ContentStatus::Embedded => "embedded",
            ContentStatus::Indexed => "indexed",
            ContentStatus::EmbeddingFailed => "embedding_failed",
            ContentStatus::Retired => "retired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normalized" => Some(ContentStatus::Normalized),
            "embedded" => Some(ContentStatus::Embedded),
            "indexed" => Some(ContentStatus::Indexed),
            "embedding_failed" => Some(ContentStatus::EmbeddingFailed),
            "retired" => Some(ContentStatus::Retired),
            _ => None,
        }
    }

    /// States in which an embedding vector is attached.
    pub fn carries_embedding(&self) -> bool {
        matches!(self, ContentStatus::Embedded | ContentStatus::Indexed)
    }
}

/// Canonical content entity produced by the normalizer.
///
/// Fields are public for storage adapters, but status transitions should go
/// through the methods below: they keep `embedding` present exactly when the
/// status is `Embedded` or `Indexed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    /// Hex SHA-256 of `url`.
    pub id: String,
    pub source_type: SourceType,
    pub source_id: String,
    pub title: String,
    pub body_summary: String,
    /// Canonical URL.
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub tags: BTreeSet<String>,
    pub tribe_ids: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_version: Option<String>,
    pub status: ContentStatus,
    /// SHA-256 of the embedding input text; a change makes the vector stale.
    pub content_hash: String,
    pub updated_at: DateTime<Utc>,
}

impl Content {
    /// Text fed to the embedder: title, summary and tags.
    pub fn embedding_text(&self) -> String {
        let tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
        format!("{} {} {}", self.title, self.body_summary, tags.join(" "))
            .trim()
            .to_string()
    }

    pub fn attach_embedding(&mut self, vector: Vec<f32>, version: &str) {
        self.embedding = Some(vector);
        self.embedding_version = Some(version.to_string());
        self.status = ContentStatus::Embedded;
    }

    /// Only meaningful after [`attach_embedding`](Self::attach_embedding).
    pub fn mark_indexed(&mut self) {
        if self.embedding.is_some() {
            self.status = ContentStatus::Indexed;
        }
    }

    pub fn mark_embedding_failed(&mut self) {
        self.embedding = None;
        self.embedding_version = None;
        self.status = ContentStatus::EmbeddingFailed;
    }

    /// Back to `Normalized`, e.g. after the text changed on re-ingestion.
    pub fn reset_embedding(&mut self) {
        self.embedding = None;
        self.embedding_version = None;
        self.status = ContentStatus::Normalized;
    }

    pub fn retire(&mut self) {
        self.embedding = None;
        self.embedding_version = None;
        self.status = ContentStatus::Retired;
    }

    /// Whether this content needs (re-)embedding under `version`.
    pub fn needs_embedding(&self, version: &str) -> bool {
        match self.status {
            ContentStatus::Retired => false,
            ContentStatus::Normalized | ContentStatus::EmbeddingFailed => true,
            ContentStatus::Embedded | ContentStatus::Indexed => {
                self.embedding_version.as_deref() != Some(version)
            }
        }
    }
}

/// A community of interest with a standing prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tribe {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Prompt used to generate the tribe's own feed.
    pub prompt: String,
    /// Content sharing any of these tags joins the tribe on ingestion.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub member_content_ids: BTreeSet<String>,
    #[serde(default)]
    pub follower_count: u64,
    pub created_at: DateTime<Utc>,
}

/// Per-user ranking context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_ref: String,
    #[serde(default)]
    pub followed_tribes: BTreeSet<String>,
}

impl UserContext {
    pub fn new(user_ref: impl Into<String>) -> Self {
        Self {
            user_ref: user_ref.into(),
            followed_tribes: BTreeSet::new(),
        }
    }

    /// Returns `true` if the tribe was not already followed.
    pub fn follow(&mut self, tribe_id: &str) -> bool {
        self.followed_tribes.insert(tribe_id.to_string())
    }

    /// Returns `true` if the tribe was followed.
    pub fn unfollow(&mut self, tribe_id: &str) -> bool {
        self.followed_tribes.remove(tribe_id)
    }
}

/// Inclusive publication-time bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.since.map_or(true, |s| ts >= s) && self.until.map_or(true, |u| ts <= u)
    }
}

/// Hard filters applied by the prompt matcher. Empty sets mean "no
/// restriction".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedFilters {
    #[serde(default)]
    pub tribe_ids: BTreeSet<String>,
    #[serde(default)]
    pub source_types: BTreeSet<SourceType>,
    #[serde(default)]
    pub exclude_ids: BTreeSet<String>,
    #[serde(default)]
    pub time_window: Option<TimeWindow>,
}

/// One `GenerateFeed` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedRequest {
    pub prompt: String,
    #[serde(default)]
    pub filters: FeedFilters,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub page_token: Option<String>,
}

impl FeedRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }
}

/// The individual fusion terms behind a `final_score`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Raw inner-product similarity.
    pub similarity: f64,
    /// `exp(-age_days / half_life_days)`.
    pub recency: f64,
    pub age_days: f64,
    /// 1.0 when the content belongs to a followed tribe.
    pub affinity: f64,
    /// Consecutive same-source items ranked directly ahead.
    pub same_source_run: u32,
    pub similarity_term: f64,
    pub recency_term: f64,
    pub affinity_term: f64,
    /// Subtracted from the score.
    pub diversity_term: f64,
}

/// A ranked entry of a [`FeedResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub content_id: String,
    pub final_score: f64,
    pub score_breakdown: ScoreBreakdown,
    pub title: String,
    pub url: String,
    pub source_type: SourceType,
    pub published_at: DateTime<Utc>,
}

/// One page of a generated feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedResult {
    pub prompt: String,
    pub items: Vec<FeedItem>,
    pub next_page_token: Option<String>,
    /// Instant recency was computed against.
    pub as_of: DateTime<Utc>,
    pub embedding_version: String,
}

/// An immutable, shareable copy of a feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareSnapshot {
    pub share_id: String,
    pub owner_ref: String,
    pub prompt: String,
    pub feed: FeedResult,
    pub created_at: DateTime<Utc>,
}
