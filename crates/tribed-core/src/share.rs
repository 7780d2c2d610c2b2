//! Share snapshots.
//!
//! A snapshot is a frozen copy of a [`FeedResult`] stored under a short,
//! URL-safe share id. Later ingestion, retirement or re-ranking never
//! changes what a share id resolves to.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;

use crate::error::FeedError;
use crate::models::{FeedResult, ShareSnapshot};
use crate::store::Store;

/// Attempts at drawing an unused share id before giving up.
const MAX_ID_ATTEMPTS: usize = 8;

type IdSource = Box<dyn Fn() -> String + Send + Sync>;

/// 22-character base64url encoding of a random UUID.
pub fn new_share_id() -> String {
    URL_SAFE_NO_PAD.encode(uuid::Uuid::new_v4().as_bytes())
}

/// Creates and resolves snapshots on top of a [`Store`].
pub struct ShareSnapshotStore<S: Store + ?Sized> {
    store: Arc<S>,
    ids: IdSource,
}

impl<S: Store + ?Sized> ShareSnapshotStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            ids: Box::new(new_share_id),
        }
    }

    /// Use a custom id source, e.g. a deterministic one in tests.
    pub fn with_id_source(store: Arc<S>, ids: impl Fn() -> String + Send + Sync + 'static) -> Self {
        Self {
            store,
            ids: Box::new(ids),
        }
    }

    /// Freeze `feed` under a fresh share id. The store's insert-if-absent
    /// guarantees two concurrent calls never receive the same id.
    pub async fn create(&self, feed: &FeedResult, owner_ref: &str) -> Result<ShareSnapshot, FeedError> {
        for attempt in 1..=MAX_ID_ATTEMPTS {
            let snapshot = ShareSnapshot {
                share_id: (self.ids)(),
                owner_ref: owner_ref.to_string(),
                prompt: feed.prompt.clone(),
                feed: feed.clone(),
                created_at: Utc::now(),
            };
            if self.store.insert_snapshot(&snapshot).await? {
                tracing::debug!(share_id = %snapshot.share_id, items = snapshot.feed.items.len(), "share snapshot created");
                return Ok(snapshot);
            }
            tracing::warn!(attempt, share_id = %snapshot.share_id, "share id collision, drawing another");
        }
        Err(FeedError::ServiceUnavailable(format!(
            "no free share id after {} attempts",
            MAX_ID_ATTEMPTS
        )))
    }

    pub async fn get(&self, share_id: &str) -> Result<ShareSnapshot, FeedError> {
        self.store
            .get_snapshot(share_id)
            .await?
            .ok_or_else(|| FeedError::ShareNotFound(share_id.to_string()))
    }
}
