//! Feed assembly: dedup, pagination and result shaping.
//!
//! Duplicates are detected by canonical URL and by normalized title; the
//! first (higher-ranked) occurrence wins.
//!
//! Pages are cut from one fixed-depth ranked list. A page token freezes the
//! `as_of` instant used for recency and a fingerprint of the full deduped id
//! order, so following tokens never repeats or skips an item. If the ranked
//! list has changed since the token was issued, the token is rejected rather
//! than silently producing an inconsistent page.

use std::collections::HashSet;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FeedError;
use crate::fusion::ScoredItem;
use crate::models::{FeedItem, FeedResult};
use crate::normalize::hash_text;

/// Decoded form of a `next_page_token`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageToken {
    #[serde(rename = "o")]
    pub offset: usize,
    /// `as_of` in milliseconds since the epoch.
    #[serde(rename = "t")]
    pub as_of_ms: i64,
    #[serde(rename = "f")]
    pub fingerprint: String,
}

impl PageToken {
    pub fn encode(&self) -> String {
        // Serializing a plain struct of integers and a string cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> Result<Self, FeedError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| FeedError::InvalidPageToken(format!("not base64url: {}", e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| FeedError::InvalidPageToken(format!("malformed token: {}", e)))
    }

    pub fn as_of(&self) -> Result<DateTime<Utc>, FeedError> {
        DateTime::from_timestamp_millis(self.as_of_ms)
            .ok_or_else(|| FeedError::InvalidPageToken("timestamp out of range".into()))
    }
}

/// `now` truncated to whole milliseconds, the precision a token carries.
pub fn feed_instant(now: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Lower-case, punctuation stripped, whitespace collapsed.
pub fn normalize_title(title: &str) -> String {
    title
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Drop items whose canonical URL or normalized title already appeared
/// earlier in `ranked`.
pub fn dedup(ranked: Vec<ScoredItem>) -> Vec<ScoredItem> {
    let mut urls = HashSet::new();
    let mut titles = HashSet::new();
    ranked
        .into_iter()
        .filter(|item| {
            let title = normalize_title(&item.content.title);
            let fresh_url = !urls.contains(&item.content.url);
            let fresh_title = title.is_empty() || !titles.contains(&title);
            if fresh_url && fresh_title {
                urls.insert(item.content.url.clone());
                if !title.is_empty() {
                    titles.insert(title);
                }
                true
            } else {
                false
            }
        })
        .collect()
}

/// Hash of the deduped id order.
pub fn fingerprint(ranked: &[ScoredItem]) -> String {
    let ids: Vec<&str> = ranked.iter().map(|i| i.content.id.as_str()).collect();
    hash_text(&ids.join("\n"))
}

/// Where a page request starts.
#[derive(Debug, Clone)]
pub struct PageCursor {
    pub offset: usize,
    pub as_of: DateTime<Utc>,
    /// Present when resuming from a token.
    pub expected_fingerprint: Option<String>,
}

impl PageCursor {
    pub fn first(now: DateTime<Utc>) -> Self {
        Self {
            offset: 0,
            as_of: feed_instant(now),
            expected_fingerprint: None,
        }
    }

    pub fn resume(token: &str) -> Result<Self, FeedError> {
        let token = PageToken::decode(token)?;
        Ok(Self {
            offset: token.offset,
            as_of: token.as_of()?,
            expected_fingerprint: Some(token.fingerprint),
        })
    }
}

/// Cut one page from the deduped ranking.
pub fn assemble_page(
    prompt: &str,
    ranked: Vec<ScoredItem>,
    cursor: &PageCursor,
    page_size: usize,
    embedding_version: &str,
) -> Result<FeedResult, FeedError> {
    let fp = fingerprint(&ranked);
    if let Some(expected) = &cursor.expected_fingerprint {
        if *expected != fp {
            return Err(FeedError::InvalidPageToken(
                "feed changed since the token was issued".into(),
            ));
        }
    }
    if cursor.offset > ranked.len() {
        return Err(FeedError::InvalidPageToken(format!(
            "offset {} beyond {} items",
            cursor.offset,
            ranked.len()
        )));
    }

    let end = cursor.offset.saturating_add(page_size).min(ranked.len());
    let next_page_token = (end < ranked.len()).then(|| {
        PageToken {
            offset: end,
            as_of_ms: cursor.as_of.timestamp_millis(),
            fingerprint: fp,
        }
        .encode()
    });

    let items = ranked
        .into_iter()
        .skip(cursor.offset)
        .take(end - cursor.offset)
        .map(|item| FeedItem {
            content_id: item.content.id,
            final_score: item.final_score,
            score_breakdown: item.breakdown,
            title: item.content.title,
            url: item.content.url,
            source_type: item.content.source_type,
            published_at: item.content.published_at,
        })
        .collect();

    Ok(FeedResult {
        prompt: prompt.to_string(),
        items,
        next_page_token,
        as_of: cursor.as_of,
        embedding_version: embedding_version.to_string(),
    })
}
