//! Storage abstraction for Tribed.
//!
//! The [`Store`] trait covers every persistent entity the engine touches:
//! content, tribes, user contexts and share snapshots. The vector index is
//! not persisted separately; it is rebuilt from the embeddings stored on
//! each [`Content`] at startup.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Content, ShareSnapshot, Tribe, UserContext};

pub use memory::InMemoryStore;

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_content`](Store::upsert_content) | Insert or replace a content row |
/// | [`get_contents`](Store::get_contents) | Batch lookup, preserving request order |
/// | [`list_contents`](Store::list_contents) | Every content, ordered by id |
/// | [`upsert_tribe`](Store::upsert_tribe) | Insert or replace a tribe |
/// | [`upsert_user`](Store::upsert_user) | Insert or replace a user context |
/// | [`insert_snapshot`](Store::insert_snapshot) | Insert-if-absent a share snapshot |
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_content(&self, content: &Content) -> Result<()>;

    async fn get_content(&self, id: &str) -> Result<Option<Content>>;

    /// Contents for `ids` in the same order; unknown ids are skipped.
    async fn get_contents(&self, ids: &[String]) -> Result<Vec<Content>>;

    async fn list_contents(&self) -> Result<Vec<Content>>;

    async fn upsert_tribe(&self, tribe: &Tribe) -> Result<()>;

    async fn get_tribe(&self, id: &str) -> Result<Option<Tribe>>;

    /// Every tribe, ordered by id.
    async fn list_tribes(&self) -> Result<Vec<Tribe>>;

    async fn get_user(&self, user_ref: &str) -> Result<Option<UserContext>>;

    async fn upsert_user(&self, user: &UserContext) -> Result<()>;

    /// Store `snapshot` unless its `share_id` is taken. Returns `false` on a
    /// clash, leaving the existing snapshot untouched.
    async fn insert_snapshot(&self, snapshot: &ShareSnapshot) -> Result<bool>;

    async fn get_snapshot(&self, share_id: &str) -> Result<Option<ShareSnapshot>>;
}
