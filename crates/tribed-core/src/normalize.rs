//! Content ingestion normalizer.
//!
//! Turns heterogeneous raw source records into canonical [`Content`]
//! entities in state [`ContentStatus::Normalized`].
//!
//! # Pipeline
//!
//! 1. [`SourceRecord::validate`] checks a [`RawRecord`] once at the boundary:
//!    source type, source id, URL canonicalization and markup stripping.
//!    Anything malformed becomes an [`IngestionError`].
//! 2. [`Normalizer::normalize`] bounds the summary, derives a title if
//!    missing, merges tags (record ∪ source taxonomy ∪ keyword categories)
//!    and computes the stable id and content hash.
//! 3. [`merge_reingested`] folds a re-ingested record into the stored one so
//!    a canonical URL never yields a second id.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use crate::config::NormalizerSettings;
use crate::error::IngestionError;
use crate::models::{Content, ContentStatus, SourceType};

/// Query parameters dropped during canonicalization, matched exactly.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "igshid", "mc_cid", "mc_eid", "ref", "ref_src", "si",
];

/// Title length used when a record arrives without one.
const DERIVED_TITLE_CHARS: usize = 80;

/// Keyword categories assigned from title and text.
const CATEGORIES: &[(&str, &[&str])] = &[
    (
        "psychology",
        &["psychology", "mental health", "mindfulness", "therapy", "cognitive"],
    ),
    (
        "founder_story",
        &["founder", "startup", "entrepreneur", "business", "company"],
    ),
    (
        "lifestyle",
        &["lifestyle", "wellness", "fitness", "health", "travel"],
    ),
    (
        "tech",
        &["technology", "ai", "software", "coding", "developer", "programming"],
    ),
    ("product", &["product", "design", "ux", "interface", "features"]),
    ("finance", &["finance", "investing", "money", "crypto", "stocks"]),
    (
        "education",
        &["learning", "education", "tutorial", "course", "teaching"],
    ),
    (
        "entertainment",
        &["entertainment", "movie", "music", "gaming", "art"],
    ),
];

/// Raw record as delivered by a scraping connector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub source_type: String,
    #[serde(default)]
    pub source_id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub raw_text: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Set by connectors when the source no longer lists the item.
    #[serde(default)]
    pub removed: bool,
}

/// A validated record: the source type tag plus a typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub source_type: SourceType,
    pub payload: SourcePayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourcePayload {
    /// A live item to normalize.
    Item(ItemPayload),
    /// The source marked this URL as removed.
    Removed { source_id: String, url: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemPayload {
    pub source_id: String,
    /// Canonical URL.
    pub url: String,
    pub title: Option<String>,
    /// Markup-free, whitespace-collapsed text.
    pub text: String,
    pub published_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
}

/// Why a URL could not be canonicalized.
#[derive(Debug, Error)]
pub enum UrlError {
    #[error(transparent)]
    Parse(#[from] url::ParseError),
    #[error("unsupported scheme {0:?}")]
    Scheme(String),
    #[error("url has no host")]
    NoHost,
}

impl SourceRecord {
    /// Validate a raw record. This is the only place raw, untyped fields are
    /// inspected.
    pub fn validate(raw: &RawRecord) -> Result<Self, IngestionError> {
        let source_type: SourceType = raw.source_type.parse()?;
        let source_id = raw.source_id.trim().to_string();
        if source_id.is_empty() {
            return Err(IngestionError::MissingSourceId);
        }

        let raw_url = raw
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| IngestionError::MissingUrl {
                source_id: source_id.clone(),
            })?;
        let url = canonicalize_url(raw_url).map_err(|e| IngestionError::InvalidUrl {
            source_id: source_id.clone(),
            url: raw_url.to_string(),
            reason: e.to_string(),
        })?;

        if raw.removed {
            return Ok(SourceRecord {
                source_type,
                payload: SourcePayload::Removed { source_id, url },
            });
        }

        let text = strip_markup(raw.raw_text.as_deref().unwrap_or(""));
        if text.is_empty() {
            return Err(IngestionError::EmptyText { source_id });
        }

        let title = raw
            .title
            .as_deref()
            .map(strip_markup)
            .filter(|t| !t.is_empty());

        Ok(SourceRecord {
            source_type,
            payload: SourcePayload::Item(ItemPayload {
                source_id,
                url,
                title,
                text,
                published_at: raw.published_at,
                tags: raw.tags.clone(),
            }),
        })
    }

    /// Stable content id this record maps to.
    pub fn content_id(&self) -> String {
        match &self.payload {
            SourcePayload::Item(item) => content_id(&item.url),
            SourcePayload::Removed { url, .. } => content_id(url),
        }
    }
}

/// Builds [`Content`] from validated items.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    settings: NormalizerSettings,
}

impl Normalizer {
    pub fn new(settings: NormalizerSettings) -> Self {
        Self { settings }
    }

    /// Normalize a validated item. `now` stands in for a missing
    /// `published_at` and stamps `updated_at`.
    pub fn normalize(
        &self,
        source_type: SourceType,
        item: ItemPayload,
        now: DateTime<Utc>,
    ) -> Content {
        let body_summary = summarize(&item.text, self.settings.summary_chars);
        let title = item
            .title
            .unwrap_or_else(|| summarize(&item.text, DERIVED_TITLE_CHARS));

        let mut tags: BTreeSet<String> = item.tags.iter().filter_map(|t| normalize_tag(t)).collect();
        tags.extend(source_taxonomy(source_type).iter().map(|t| t.to_string()));
        tags.extend(classify(&format!("{} {}", title, item.text)));

        let mut content = Content {
            id: content_id(&item.url),
            source_type,
            source_id: item.source_id,
            title,
            body_summary,
            url: item.url,
            published_at: item.published_at.unwrap_or(now),
            tags,
            tribe_ids: BTreeSet::new(),
            embedding: None,
            embedding_version: None,
            status: ContentStatus::Normalized,
            content_hash: String::new(),
            updated_at: now,
        };
        content.content_hash = hash_text(&content.embedding_text());
        content
    }
}

/// Fold a freshly normalized record into the stored content with the same
/// id. Mutable fields are refreshed in place; tribe membership is kept. The
/// embedding survives only when the embedding input is unchanged and the
/// stored content was live.
///
/// Returns `true` when the content must be (re-)embedded.
pub fn merge_reingested(existing: &mut Content, fresh: Content) -> bool {
    debug_assert_eq!(existing.id, fresh.id);
    let text_changed = existing.content_hash != fresh.content_hash;

    existing.source_type = fresh.source_type;
    existing.source_id = fresh.source_id;
    existing.title = fresh.title;
    existing.body_summary = fresh.body_summary;
    existing.published_at = fresh.published_at;
    existing.tags = fresh.tags;
    existing.content_hash = fresh.content_hash;
    existing.updated_at = fresh.updated_at;

    if text_changed || existing.status == ContentStatus::Retired {
        existing.reset_embedding();
    }
    !existing.status.carries_embedding()
}

/// Canonicalize a URL for dedup: lower-case scheme and host, no `www.`, no
/// fragment, no default port, no trailing slash, tracking parameters
/// removed and remaining query pairs sorted.
pub fn canonicalize_url(raw: &str) -> Result<String, UrlError> {
    let mut url = Url::parse(raw.trim())?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(UrlError::Scheme(other.to_string())),
    }
    let host = url.host_str().ok_or(UrlError::NoHost)?.to_string();
    if let Some(bare) = host.strip_prefix("www.") {
        url.set_host(Some(bare))?;
    }
    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs.iter());
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    Ok(url.into())
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Content id for a canonical URL: hex SHA-256.
pub fn content_id(canonical_url: &str) -> String {
    hash_text(canonical_url)
}

pub(crate) fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Remove HTML markup: tags dropped, `script`/`style` bodies dropped,
/// common entities decoded, whitespace collapsed.
pub fn strip_markup(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        let after = &rest[start..];
        let opens_tag = after[1..]
            .chars()
            .next()
            .map_or(false, |c| c.is_ascii_alphabetic() || c == '/' || c == '!');
        let end = match after.find('>') {
            Some(end) if opens_tag => end,
            _ => {
                out.push('<');
                rest = &after[1..];
                continue;
            }
        };

        let tag = &after[1..end];
        let name = tag
            .trim_start_matches('/')
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();
        rest = &after[end + 1..];

        if !tag.starts_with('/') && (name == "script" || name == "style") {
            let closing = format!("</{}", name);
            rest = match rest.to_ascii_lowercase().find(&closing) {
                Some(pos) => &rest[pos..],
                None => "",
            };
        }
        out.push(' ');
    }
    out.push_str(rest);

    decode_entities(&out)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp..];
        let decoded = after
            .find(';')
            .filter(|semi| *semi <= 10)
            .and_then(|semi| decode_entity(&after[1..semi]).map(|c| (c, semi)));
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &after[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &after[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" | "#39" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Bound `text` to `budget` characters, cutting on a word boundary when one
/// exists in the second half and appending an ellipsis.
pub fn summarize(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }
    if budget == 0 {
        return String::new();
    }
    let keep: String = text.chars().take(budget - 1).collect();
    let cut = match keep.rfind(char::is_whitespace) {
        Some(pos) if keep[..pos].chars().count() >= budget / 2 => &keep[..pos],
        _ => keep.as_str(),
    };
    format!("{}…", cut.trim_end())
}

fn normalize_tag(tag: &str) -> Option<String> {
    let tag = tag
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase();
    if tag.is_empty() {
        None
    } else {
        Some(tag)
    }
}

/// Tags every item of a source type carries.
pub fn source_taxonomy(source_type: SourceType) -> &'static [&'static str] {
    match source_type {
        SourceType::Reddit => &["community"],
        SourceType::Youtube => &["video", "youtube"],
        SourceType::Medium => &["article", "blog"],
        SourceType::Podcast => &["podcast", "audio"],
        SourceType::Github => &["code", "github", "opensource"],
        SourceType::Rss => &["article"],
        SourceType::Web => &[],
    }
}

/// Keyword categories for `text`; `general` when none match.
pub fn classify(text: &str) -> BTreeSet<String> {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    let padded = format!(" {} ", words.join(" "));

    let mut found: BTreeSet<String> = CATEGORIES
        .iter()
        .filter(|(_, keywords)| {
            keywords
                .iter()
                .any(|kw| padded.contains(&format!(" {} ", kw)))
        })
        .map(|(category, _)| category.to_string())
        .collect();
    if found.is_empty() {
        found.insert("general".to_string());
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(url: &str, text: &str) -> RawRecord {
        RawRecord {
            source_type: "reddit".into(),
            source_id: "t3_abc".into(),
            url: Some(url.into()),
            title: Some("Rust <b>systems</b> programming".into()),
            raw_text: Some(text.into()),
            published_at: None,
            tags: vec!["Rust".into(), "  Systems  Programming ".into()],
            removed: false,
        }
    }

    fn item(record: SourceRecord) -> ItemPayload {
        match record.payload {
            SourcePayload::Item(item) => item,
            other => panic!("expected item, got {:?}", other),
        }
    }

    #[test]
    fn test_canonical_url_strips_tracking() {
        let a = canonicalize_url("https://reddit.com/r/rust/abc").unwrap();
        let b = canonicalize_url("https://reddit.com/r/rust/abc?utm=1").unwrap();
        let c = canonicalize_url("HTTPS://WWW.Reddit.com/r/rust/abc/?utm_source=x&fbclid=y#top")
            .unwrap();
        assert_eq!(a, "https://reddit.com/r/rust/abc");
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_canonical_url_keeps_and_sorts_real_params() {
        let a = canonicalize_url("https://youtube.com/watch?v=xyz&list=p1&si=track").unwrap();
        let b = canonicalize_url("https://youtube.com/watch?list=p1&v=xyz").unwrap();
        assert_eq!(a, b);
        assert!(a.contains("v=xyz"));
    }

    #[test]
    fn test_canonical_url_drops_default_port() {
        let a = canonicalize_url("https://example.com:443/post").unwrap();
        assert_eq!(a, "https://example.com/post");
    }

    #[test]
    fn test_canonical_url_rejects_other_schemes() {
        assert!(matches!(
            canonicalize_url("mailto:someone@example.com"),
            Err(UrlError::Scheme(_))
        ));
        assert!(canonicalize_url("not a url").is_err());
    }

    #[test]
    fn test_strip_markup() {
        let html = "<p>Hello&nbsp;<b>world</b> &amp; friends</p><script>var x = 1 < 2;</script><style>p{}</style> 3 < 4 &#x41;";
        assert_eq!(strip_markup(html), "Hello world & friends 3 < 4 A");
    }

    #[test]
    fn test_strip_markup_unknown_entity_kept() {
        assert_eq!(strip_markup("fish &chips; AT&T"), "fish &chips; AT&T");
    }

    #[test]
    fn test_summarize_bounds_chars() {
        let text = "word ".repeat(200);
        let s = summarize(text.trim(), 50);
        assert!(s.chars().count() <= 50);
        assert!(s.ends_with('…'));
        assert!(!s.contains("wo…"), "cut mid-word: {}", s);

        assert_eq!(summarize("short", 50), "short");
        assert_eq!(summarize("ééééé", 3), "éé…");
    }

    #[test]
    fn test_validate_rejects_malformed() {
        let mut r = raw("https://reddit.com/r/rust/abc", "text");
        r.url = None;
        assert!(matches!(
            SourceRecord::validate(&r),
            Err(IngestionError::MissingUrl { .. })
        ));

        let r = raw("https://reddit.com/r/rust/abc", "   <br/>  ");
        assert!(matches!(
            SourceRecord::validate(&r),
            Err(IngestionError::EmptyText { .. })
        ));

        let mut r = raw("https://reddit.com/r/rust/abc", "text");
        r.source_type = "friendster".into();
        assert!(matches!(
            SourceRecord::validate(&r),
            Err(IngestionError::UnknownSourceType(_))
        ));

        let mut r = raw("https://reddit.com/r/rust/abc", "text");
        r.source_id = " ".into();
        assert_eq!(
            SourceRecord::validate(&r),
            Err(IngestionError::MissingSourceId)
        );

        let r = raw("ftp://reddit.com/file", "text");
        assert!(matches!(
            SourceRecord::validate(&r),
            Err(IngestionError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_removed_record_needs_no_text() {
        let mut r = raw("https://reddit.com/r/rust/abc?utm=1", "");
        r.removed = true;
        let rec = SourceRecord::validate(&r).unwrap();
        assert_eq!(
            rec.content_id(),
            content_id("https://reddit.com/r/rust/abc")
        );
        assert!(matches!(rec.payload, SourcePayload::Removed { .. }));
    }

    #[test]
    fn test_normalize_builds_content() {
        let now = Utc::now();
        let rec = SourceRecord::validate(&raw(
            "https://reddit.com/r/rust/abc?utm=1",
            "<p>Ownership makes systems programming safe.</p>",
        ))
        .unwrap();
        let content = Normalizer::default().normalize(rec.source_type, item(rec), now);

        assert_eq!(content.id, content_id("https://reddit.com/r/rust/abc"));
        assert_eq!(content.url, "https://reddit.com/r/rust/abc");
        assert_eq!(content.title, "Rust systems programming");
        assert_eq!(content.body_summary, "Ownership makes systems programming safe.");
        assert_eq!(content.published_at, now);
        assert_eq!(content.status, ContentStatus::Normalized);
        assert!(content.tags.contains("rust"));
        assert!(content.tags.contains("systems-programming"));
        assert!(content.tags.contains("community"));
        assert!(content.tags.contains("tech"));
        assert_eq!(content.content_hash, hash_text(&content.embedding_text()));
    }

    #[test]
    fn test_missing_title_derived_from_text() {
        let mut r = raw("https://example.com/a", "A long body about gardening in spring");
        r.title = None;
        r.source_type = "web".into();
        let rec = SourceRecord::validate(&r).unwrap();
        let content = Normalizer::default().normalize(rec.source_type, item(rec), Utc::now());
        assert_eq!(content.title, "A long body about gardening in spring");
    }

    #[test]
    fn test_classify() {
        let tags = classify("A startup founder talks about AI and investing");
        assert!(tags.contains("founder_story"));
        assert!(tags.contains("tech"));
        assert!(tags.contains("finance"));
        assert!(!classify("she said hello").contains("tech"), "substring 'ai' must not match");
        assert_eq!(
            classify("nothing relevant here"),
            BTreeSet::from(["general".to_string()])
        );
    }

    #[test]
    fn test_merge_reingested_keeps_id_and_embedding_when_unchanged() {
        let now = Utc::now();
        let n = Normalizer::default();
        let rec = SourceRecord::validate(&raw("https://reddit.com/r/rust/abc", "body")).unwrap();
        let mut stored = n.normalize(rec.source_type, item(rec.clone()), now);
        stored.attach_embedding(vec![1.0], "v1");
        stored.mark_indexed();

        let later = now + chrono::Duration::hours(1);
        let fresh = n.normalize(rec.source_type, item(rec), later);
        let needs = merge_reingested(&mut stored, fresh);
        assert!(!needs);
        assert_eq!(stored.status, ContentStatus::Indexed);
        assert_eq!(stored.published_at, later);
    }

    #[test]
    fn test_merge_reingested_resets_on_text_change() {
        let now = Utc::now();
        let n = Normalizer::default();
        let rec = SourceRecord::validate(&raw("https://reddit.com/r/rust/abc", "body")).unwrap();
        let mut stored = n.normalize(rec.source_type, item(rec), now);
        stored.attach_embedding(vec![1.0], "v1");
        stored.tribe_ids.insert("t1".into());

        let rec2 =
            SourceRecord::validate(&raw("https://reddit.com/r/rust/abc?utm=2", "new body")).unwrap();
        let fresh = n.normalize(rec2.source_type, item(rec2), now);
        let needs = merge_reingested(&mut stored, fresh);
        assert!(needs);
        assert_eq!(stored.status, ContentStatus::Normalized);
        assert!(stored.embedding.is_none());
        assert_eq!(stored.body_summary, "new body");
        assert!(stored.tribe_ids.contains("t1"));
    }
}
