//! The [`FeedEngine`] facade.
//!
//! Owns the vector index and embedding computer, and drives every
//! operation against a [`Store`]. Read paths (`generate_feed`, share
//! lookup, tribe listing) run concurrently. Write paths (ingestion,
//! embedding, rebuild, retirement, tribe membership and follows) take one
//! async mutex so read-merge-write sequences on the store never interleave.
//! Embedder calls run before the mutex is taken; the guarded section only
//! re-reads, merges and writes.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::assemble::{assemble_page, dedup, PageCursor};
use crate::config::EngineConfig;
use crate::embedding::{CacheStats, Embedder, Embedding, EmbeddingComputer};
use crate::error::{EmbeddingError, FeedError, IndexError};
use crate::fusion::fuse;
use crate::index::{IndexStats, IndexStore};
use crate::matcher::PromptMatcher;
use crate::models::{
    Content, ContentStatus, FeedFilters, FeedRequest, FeedResult, ShareSnapshot, Tribe,
    UserContext,
};
use crate::normalize::{merge_reingested, Normalizer, RawRecord, SourcePayload, SourceRecord};
use crate::share::ShareSnapshotStore;
use crate::store::Store;

/// What ingesting one record did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestAction {
    /// New or changed content, embedded and searchable.
    Indexed,
    /// Embedded, waiting for the index to be built or rebuilt.
    Embedded,
    /// Same embedding input as before; metadata refreshed only.
    Unchanged,
    /// Stored, but the embedder failed; `embed pending` retries it.
    EmbeddingFailed,
    /// The source reported removal and the content was retired.
    Retired,
    /// Removal reported for content never ingested.
    UnknownRemoval,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    pub id: String,
    pub action: IngestAction,
}

/// A record the batch skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    /// Zero-based position in the batch.
    pub position: usize,
    pub source_id: String,
    pub reason: String,
}

/// Per-batch tallies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub received: usize,
    pub indexed: usize,
    pub embedded: usize,
    pub unchanged: usize,
    pub embedding_failed: usize,
    pub retired: usize,
    pub skipped: Vec<SkippedRecord>,
}

impl IngestReport {
    fn record(&mut self, action: IngestAction) {
        match action {
            IngestAction::Indexed => self.indexed += 1,
            IngestAction::Embedded => self.embedded += 1,
            IngestAction::Unchanged => self.unchanged += 1,
            IngestAction::EmbeddingFailed => self.embedding_failed += 1,
            IngestAction::Retired => self.retired += 1,
            IngestAction::UnknownRemoval => {}
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmbedReport {
    pub attempted: usize,
    pub embedded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildSummary {
    pub version: String,
    pub indexed: usize,
    /// Contents embedded during the rebuild (new version or never embedded).
    pub re_embedded: usize,
    pub embedding_failed: usize,
    /// Stored vectors the index rejected; reset for re-embedding.
    pub corrupted: Vec<String>,
    /// Contents left without a current vector by [`FeedEngine::load_index`].
    pub pending: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub embedding_version: String,
    pub index: IndexStats,
    pub cache: CacheStats,
    pub contents_by_status: BTreeMap<String, usize>,
    pub tribes: usize,
}

/// Input for [`FeedEngine::create_tribe`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTribe {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub prompt: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Prompt-to-feed engine over a [`Store`].
pub struct FeedEngine<S: Store + ?Sized> {
    store: Arc<S>,
    index: IndexStore,
    computer: EmbeddingComputer,
    shares: ShareSnapshotStore<S>,
    normalizer: Normalizer,
    config: EngineConfig,
    writes: Mutex<()>,
}

impl<S: Store + ?Sized> FeedEngine<S> {
    /// Validates `config`; the index stays uninitialized until
    /// [`init`](Self::init).
    pub fn new(store: Arc<S>, embedder: Arc<dyn Embedder>, config: EngineConfig) -> Result<Self, FeedError> {
        config.validate()?;
        Ok(Self {
            shares: ShareSnapshotStore::new(store.clone()),
            store,
            index: IndexStore::new(),
            computer: EmbeddingComputer::new(embedder, config.retry, config.cache_capacity),
            normalizer: Normalizer::new(config.normalizer),
            config,
            writes: Mutex::new(()),
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn embedding_version(&self) -> String {
        self.computer.version()
    }

    /// Build the index from persisted content.
    pub async fn init(&self) -> Result<RebuildSummary, FeedError> {
        self.rebuild_index().await
    }

    /// Release the index. Subsequent feed requests fail as unavailable.
    pub fn shutdown(&self) {
        self.index.shutdown();
    }

    /// Switch embedding model. The next feed request detects the version
    /// change and rebuilds.
    pub fn set_embedder(&self, embedder: Arc<dyn Embedder>) {
        self.computer.set_embedder(embedder);
    }

    // ── Ingestion ──────────────────────────────────────────────────────

    /// Validate, normalize, merge, tag into tribes, embed and index one
    /// record. Re-ingesting a canonical URL updates the existing content.
    pub async fn ingest_record(&self, raw: &RawRecord) -> Result<IngestOutcome, FeedError> {
        let record = SourceRecord::validate(raw)?;

        let item = match record.payload {
            SourcePayload::Removed { source_id, url } => {
                let _guard = self.writes.lock().await;
                let id = crate::normalize::content_id(&url);
                let action = match self.retire_locked(&id).await? {
                    Some(true) => {
                        tracing::info!(id = %id, source_id = %source_id, "source reported removal");
                        IngestAction::Retired
                    }
                    Some(false) => IngestAction::Unchanged,
                    None => IngestAction::UnknownRemoval,
                };
                return Ok(IngestOutcome { id, action });
            }
            SourcePayload::Item(item) => item,
        };

        let fresh = self.normalizer.normalize(record.source_type, item, Utc::now());

        // Embedded outside the write lock; merging keeps every field the
        // embedding text is built from.
        let mut embedded = if self.would_embed(&fresh).await? {
            Some(self.computer.compute(&fresh.embedding_text()).await)
        } else {
            None
        };

        let _guard = self.writes.lock().await;
        let (mut content, needs_embedding) = match self.store.get_content(&fresh.id).await? {
            Some(mut existing) => {
                let needs = merge_reingested(&mut existing, fresh);
                (existing, needs)
            }
            None => (fresh, true),
        };

        self.assign_tribes(&mut content).await?;

        let action = if needs_embedding {
            let result = match embedded.take() {
                Some(result) => result,
                // State changed between the check and the lock.
                None => self.computer.compute(&content.embedding_text()).await,
            };
            self.index.remove(&content.id);
            self.apply_embedding(&mut content, result)
        } else {
            self.ensure_indexed(&mut content)
        };
        content.updated_at = Utc::now();
        self.store.upsert_content(&content).await?;

        tracing::debug!(id = %content.id, action = ?action, "record ingested");
        Ok(IngestOutcome {
            id: content.id,
            action,
        })
    }

    /// Whether ingesting `fresh` would need a new vector, judged on the
    /// stored state without holding the write lock.
    async fn would_embed(&self, fresh: &Content) -> Result<bool, FeedError> {
        Ok(match self.store.get_content(&fresh.id).await? {
            Some(mut existing) => merge_reingested(&mut existing, fresh.clone()),
            None => true,
        })
    }

    /// Ingest many records. Malformed records are skipped and reported;
    /// storage failures abort the batch.
    pub async fn ingest_batch(&self, records: &[RawRecord]) -> Result<IngestReport, FeedError> {
        let mut report = IngestReport {
            received: records.len(),
            ..Default::default()
        };
        for (position, raw) in records.iter().enumerate() {
            match self.ingest_record(raw).await {
                Ok(outcome) => report.record(outcome.action),
                Err(FeedError::Ingestion(e)) => {
                    tracing::warn!(position, source_id = %raw.source_id, error = %e, "skipping record");
                    report.skipped.push(SkippedRecord {
                        position,
                        source_id: raw.source_id.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        tracing::info!(
            received = report.received,
            indexed = report.indexed,
            unchanged = report.unchanged,
            failed = report.embedding_failed,
            skipped = report.skipped.len(),
            "batch ingested"
        );
        Ok(report)
    }

    /// Content tags overlapping a tribe's tags join that tribe.
    async fn assign_tribes(&self, content: &mut Content) -> Result<(), FeedError> {
        for mut tribe in self.store.list_tribes().await? {
            if tribe.tags.is_disjoint(&content.tags) {
                continue;
            }
            content.tribe_ids.insert(tribe.id.clone());
            if tribe.member_content_ids.insert(content.id.clone()) {
                self.store.upsert_tribe(&tribe).await?;
            }
        }
        Ok(())
    }

    fn apply_embedding(
        &self,
        content: &mut Content,
        result: Result<Embedding, EmbeddingError>,
    ) -> IngestAction {
        match result {
            Ok(embedding) => {
                content.attach_embedding(embedding.vector.clone(), &embedding.version);
                self.insert_into_index(content, embedding.vector, &embedding.version)
            }
            Err(e) => {
                tracing::warn!(id = %content.id, error = %e, "embedding failed");
                content.mark_embedding_failed();
                IngestAction::EmbeddingFailed
            }
        }
    }

    fn ensure_indexed(&self, content: &mut Content) -> IngestAction {
        if self.index.contains(&content.id) {
            return IngestAction::Unchanged;
        }
        match (content.embedding.clone(), content.embedding_version.clone()) {
            (Some(vector), Some(version)) => {
                if self.insert_into_index(content, vector, &version) == IngestAction::Indexed {
                    IngestAction::Unchanged
                } else {
                    IngestAction::Embedded
                }
            }
            _ => IngestAction::Unchanged,
        }
    }

    fn insert_into_index(&self, content: &mut Content, vector: Vec<f32>, version: &str) -> IngestAction {
        match self.index.insert(&content.id, vector, version) {
            Ok(()) => {
                content.mark_indexed();
                IngestAction::Indexed
            }
            Err(IndexError::NotReady) | Err(IndexError::VersionMismatch { .. }) => {
                content.status = ContentStatus::Embedded;
                IngestAction::Embedded
            }
            Err(e) => {
                tracing::warn!(id = %content.id, error = %e, "index rejected vector");
                content.status = ContentStatus::Embedded;
                IngestAction::Embedded
            }
        }
    }

    /// Retry embedding for content that has none under the current model.
    ///
    /// Each vector is computed without the write lock; the content is then
    /// re-read under the lock and skipped if it changed meanwhile.
    pub async fn embed_pending(&self) -> Result<EmbedReport, FeedError> {
        let version = self.computer.version();
        let pending: Vec<Content> = self
            .store
            .list_contents()
            .await?
            .into_iter()
            .filter(|c| c.needs_embedding(&version))
            .collect();

        let mut report = EmbedReport::default();
        for content in pending {
            let result = self.computer.compute(&content.embedding_text()).await;

            let _guard = self.writes.lock().await;
            let Some(mut current) = self.store.get_content(&content.id).await? else {
                continue;
            };
            if current.content_hash != content.content_hash || !current.needs_embedding(&version) {
                continue;
            }
            report.attempted += 1;
            self.index.remove(&current.id);
            match self.apply_embedding(&mut current, result) {
                IngestAction::EmbeddingFailed => report.failed += 1,
                _ => report.embedded += 1,
            }
            self.store.upsert_content(&current).await?;
        }
        tracing::info!(
            attempted = report.attempted,
            embedded = report.embedded,
            failed = report.failed,
            "pending embeddings processed"
        );
        Ok(report)
    }

    /// Rebuild the whole index under the current model version, embedding
    /// whatever lacks a current vector.
    pub async fn rebuild_index(&self) -> Result<RebuildSummary, FeedError> {
        let version = self.computer.version();
        let dims = self.computer.dims();
        let mut summary = RebuildSummary {
            version: version.clone(),
            ..Default::default()
        };

        // Stale vectors are computed first, outside the write lock, keyed by
        // id and embedding input.
        let mut fresh_vectors: HashMap<String, (String, Result<Embedding, EmbeddingError>)> =
            HashMap::new();
        for content in self.store.list_contents().await? {
            if content.needs_embedding(&version) {
                let result = self.computer.compute(&content.embedding_text()).await;
                fresh_vectors.insert(content.id.clone(), (content.content_hash.clone(), result));
            }
        }

        let _guard = self.writes.lock().await;
        let mut live = Vec::new();
        for mut content in self.store.list_contents().await? {
            if content.status == ContentStatus::Retired {
                continue;
            }
            if content.needs_embedding(&version) {
                let result = match fresh_vectors.remove(&content.id) {
                    Some((hash, result)) if hash == content.content_hash => result,
                    _ => self.computer.compute(&content.embedding_text()).await,
                };
                match result {
                    Ok(e) => {
                        content.attach_embedding(e.vector, &e.version);
                        summary.re_embedded += 1;
                    }
                    Err(e) => {
                        tracing::warn!(id = %content.id, error = %e, "embedding failed during rebuild");
                        content.mark_embedding_failed();
                        summary.embedding_failed += 1;
                        self.store.upsert_content(&content).await?;
                        continue;
                    }
                }
            }
            live.push(content);
        }

        self.install(&version, dims, live, &mut summary).await?;
        Ok(summary)
    }

    /// Build the index from stored vectors of the current model without
    /// calling the embedder. Content with no current vector is left for
    /// [`Self::embed_pending`] or [`Self::rebuild_index`].
    pub async fn load_index(&self) -> Result<RebuildSummary, FeedError> {
        let version = self.computer.version();
        let dims = self.computer.dims();
        let mut summary = RebuildSummary {
            version: version.clone(),
            ..Default::default()
        };

        let _guard = self.writes.lock().await;
        let mut live = Vec::new();
        for content in self.store.list_contents().await? {
            if content.needs_embedding(&version) {
                summary.pending += 1;
            } else if content.status != ContentStatus::Retired {
                live.push(content);
            }
        }
        self.install(&version, dims, live, &mut summary).await?;
        Ok(summary)
    }

    /// Swap in a fresh index over `live` and sync content statuses with it.
    async fn install(
        &self,
        version: &str,
        dims: usize,
        live: Vec<Content>,
        summary: &mut RebuildSummary,
    ) -> Result<(), FeedError> {
        let entries = live
            .iter()
            .filter_map(|c| c.embedding.clone().map(|v| (c.id.clone(), v)));
        let report = self.index.rebuild(version, dims, entries)?;
        summary.indexed = report.indexed;
        summary.corrupted = report.skipped;

        let corrupted: BTreeSet<&str> = summary.corrupted.iter().map(String::as_str).collect();
        for mut content in live {
            let before = content.status;
            if corrupted.contains(content.id.as_str()) {
                content.reset_embedding();
            } else {
                content.mark_indexed();
            }
            if content.status != before {
                self.store.upsert_content(&content).await?;
            }
        }
        Ok(())
    }

    /// Drop tombstones from the index.
    pub fn compact_index(&self) -> Result<usize, FeedError> {
        Ok(self.index.compact()?)
    }

    /// Compact if tombstones exceed the configured ratio.
    pub fn maybe_compact(&self) -> Result<Option<usize>, FeedError> {
        if self.index.needs_compaction(self.config.index.compact_tombstone_ratio) {
            return self.compact_index().map(Some);
        }
        Ok(None)
    }

    /// Retire one content: it leaves the index and every tribe, and is never
    /// served again. Returns `false` if it was already retired.
    pub async fn retire(&self, id: &str) -> Result<bool, FeedError> {
        let _guard = self.writes.lock().await;
        match self.retire_locked(id).await? {
            Some(changed) => Ok(changed),
            None => Err(FeedError::ContentNotFound(id.to_string())),
        }
    }

    /// Retire every live content published before `cutoff`.
    pub async fn retire_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, FeedError> {
        let _guard = self.writes.lock().await;
        let mut retired = 0;
        for content in self.store.list_contents().await? {
            if content.status != ContentStatus::Retired && content.published_at < cutoff {
                if let Some(true) = self.retire_locked(&content.id).await? {
                    retired += 1;
                }
            }
        }
        tracing::info!(retired, cutoff = %cutoff, "retired old content");
        Ok(retired)
    }

    /// `None` if unknown, `Some(false)` if already retired.
    async fn retire_locked(&self, id: &str) -> Result<Option<bool>, FeedError> {
        let Some(mut content) = self.store.get_content(id).await? else {
            return Ok(None);
        };
        if content.status == ContentStatus::Retired {
            return Ok(Some(false));
        }
        self.index.remove(id);
        for tribe_id in &content.tribe_ids {
            if let Some(mut tribe) = self.store.get_tribe(tribe_id).await? {
                if tribe.member_content_ids.remove(id) {
                    self.store.upsert_tribe(&tribe).await?;
                }
            }
        }
        content.tribe_ids.clear();
        content.retire();
        content.updated_at = Utc::now();
        self.store.upsert_content(&content).await?;
        Ok(Some(true))
    }

    /// Index counters only; never touches storage.
    pub fn index_stats(&self) -> IndexStats {
        self.index.stats()
    }

    pub async fn stats(&self) -> Result<EngineStats, FeedError> {
        let mut by_status = BTreeMap::new();
        for content in self.store.list_contents().await? {
            *by_status.entry(content.status.as_str().to_string()).or_insert(0) += 1;
        }
        Ok(EngineStats {
            embedding_version: self.computer.version(),
            index: self.index.stats(),
            cache: self.computer.cache_stats(),
            contents_by_status: by_status,
            tribes: self.store.list_tribes().await?.len(),
        })
    }

    // ── Feeds ──────────────────────────────────────────────────────────

    /// Rank the corpus against `request.prompt` for `user` and return one
    /// page.
    ///
    /// When the index holds vectors of another model version, a rebuild is
    /// run and the original [`IndexError::VersionMismatch`] is returned;
    /// the caller retries.
    pub async fn generate_feed(&self, request: &FeedRequest, user: &UserContext) -> Result<FeedResult, FeedError> {
        let cursor = match &request.page_token {
            Some(token) => PageCursor::resume(token)?,
            None => PageCursor::first(Utc::now()),
        };
        let page_size = self.config.feed.page_size(request.page_size);

        let matcher = PromptMatcher::new(&self.computer, &self.index, self.store.as_ref());
        let outcome = match matcher
            .candidates(&request.prompt, &request.filters, self.config.feed.candidate_k)
            .await
        {
            Ok(outcome) => outcome,
            Err(err @ FeedError::Index(IndexError::VersionMismatch { .. })) => {
                tracing::warn!(error = %err, "embedding version changed, rebuilding index");
                self.rebuild_index().await?;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let ranked = dedup(fuse(outcome.candidates, user, &self.config.ranking, cursor.as_of));
        let result = assemble_page(
            request.prompt.trim(),
            ranked,
            &cursor,
            page_size,
            &outcome.embedding_version,
        )?;
        tracing::debug!(
            items = result.items.len(),
            more = result.next_page_token.is_some(),
            "feed generated"
        );
        Ok(result)
    }

    /// The stored context for `user_ref`, or an empty one.
    pub async fn user_context(&self, user_ref: Option<&str>) -> Result<UserContext, FeedError> {
        match user_ref {
            Some(user_ref) => Ok(self
                .store
                .get_user(user_ref)
                .await?
                .unwrap_or_else(|| UserContext::new(user_ref))),
            None => Ok(UserContext::default()),
        }
    }

    pub async fn create_share(&self, feed: &FeedResult, owner_ref: &str) -> Result<ShareSnapshot, FeedError> {
        self.shares.create(feed, owner_ref).await
    }

    pub async fn get_shared_feed(&self, share_id: &str) -> Result<ShareSnapshot, FeedError> {
        self.shares.get(share_id).await
    }

    // ── Tribes ─────────────────────────────────────────────────────────

    /// Create a tribe and back-fill membership from existing content tags.
    pub async fn create_tribe(&self, new: NewTribe) -> Result<Tribe, FeedError> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(FeedError::InvalidRequest("tribe name must not be empty".into()));
        }
        if new.prompt.trim().is_empty() {
            return Err(FeedError::InvalidPrompt);
        }

        let _guard = self.writes.lock().await;
        let mut tribe = Tribe {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: new.description.trim().to_string(),
            prompt: new.prompt.trim().to_string(),
            tags: new
                .tags
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            member_content_ids: BTreeSet::new(),
            follower_count: 0,
            created_at: Utc::now(),
        };

        for mut content in self.store.list_contents().await? {
            if content.status == ContentStatus::Retired || tribe.tags.is_disjoint(&content.tags) {
                continue;
            }
            tribe.member_content_ids.insert(content.id.clone());
            content.tribe_ids.insert(tribe.id.clone());
            self.store.upsert_content(&content).await?;
        }
        self.store.upsert_tribe(&tribe).await?;
        tracing::info!(id = %tribe.id, name = %tribe.name, members = tribe.member_content_ids.len(), "tribe created");
        Ok(tribe)
    }

    pub async fn get_tribe(&self, tribe_id: &str) -> Result<Tribe, FeedError> {
        self.store
            .get_tribe(tribe_id)
            .await?
            .ok_or_else(|| FeedError::TribeNotFound(tribe_id.to_string()))
    }

    /// Add a content to a tribe explicitly.
    pub async fn add_to_tribe(&self, tribe_id: &str, content_id: &str) -> Result<Tribe, FeedError> {
        let _guard = self.writes.lock().await;
        let mut tribe = self.get_tribe(tribe_id).await?;
        let mut content = self
            .store
            .get_content(content_id)
            .await?
            .ok_or_else(|| FeedError::ContentNotFound(content_id.to_string()))?;
        if tribe.member_content_ids.insert(content.id.clone()) {
            self.store.upsert_tribe(&tribe).await?;
        }
        if content.tribe_ids.insert(tribe.id.clone()) {
            self.store.upsert_content(&content).await?;
        }
        Ok(tribe)
    }

    /// Follow a tribe. Idempotent; `follower_count` moves only on change.
    pub async fn follow_tribe(&self, user_ref: &str, tribe_id: &str) -> Result<UserContext, FeedError> {
        let _guard = self.writes.lock().await;
        let mut tribe = self.get_tribe(tribe_id).await?;
        let mut user = self.user_context(Some(user_ref)).await?;
        if user.follow(tribe_id) {
            tribe.follower_count += 1;
            self.store.upsert_tribe(&tribe).await?;
            self.store.upsert_user(&user).await?;
        }
        Ok(user)
    }

    pub async fn unfollow_tribe(&self, user_ref: &str, tribe_id: &str) -> Result<UserContext, FeedError> {
        let _guard = self.writes.lock().await;
        let mut tribe = self.get_tribe(tribe_id).await?;
        let mut user = self.user_context(Some(user_ref)).await?;
        if user.unfollow(tribe_id) {
            tribe.follower_count = tribe.follower_count.saturating_sub(1);
            self.store.upsert_tribe(&tribe).await?;
            self.store.upsert_user(&user).await?;
        }
        Ok(user)
    }

    /// Tribes by follower count, most followed first, id ascending on ties.
    pub async fn discover_tribes(&self, limit: usize) -> Result<Vec<Tribe>, FeedError> {
        let mut tribes = self.store.list_tribes().await?;
        tribes.sort_by(|a, b| {
            b.follower_count
                .cmp(&a.follower_count)
                .then_with(|| a.id.cmp(&b.id))
        });
        tribes.truncate(limit);
        Ok(tribes)
    }

    /// The tribe's own feed: its standing prompt restricted to members.
    pub async fn tribe_feed(
        &self,
        tribe_id: &str,
        user: &UserContext,
        page_size: Option<usize>,
        page_token: Option<String>,
    ) -> Result<FeedResult, FeedError> {
        let tribe = self.get_tribe(tribe_id).await?;
        let request = FeedRequest {
            prompt: tribe.prompt,
            filters: FeedFilters {
                tribe_ids: BTreeSet::from([tribe.id]),
                ..Default::default()
            },
            page_size,
            page_token,
        };
        self.generate_feed(&request, user).await
    }
}
