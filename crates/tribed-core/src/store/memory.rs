//! In-memory [`Store`] implementation for tests and ephemeral runs.
//!
//! Uses `BTreeMap`s behind `std::sync::RwLock`, so listings come out
//! ordered by key without extra sorting.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{Content, ShareSnapshot, Tribe, UserContext};

use super::Store;

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    contents: RwLock<BTreeMap<String, Content>>,
    tribes: RwLock<BTreeMap<String, Tribe>>,
    users: RwLock<BTreeMap<String, UserContext>>,
    snapshots: RwLock<BTreeMap<String, ShareSnapshot>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_content(&self, content: &Content) -> Result<()> {
        write(&self.contents)?.insert(content.id.clone(), content.clone());
        Ok(())
    }

    async fn get_content(&self, id: &str) -> Result<Option<Content>> {
        Ok(read(&self.contents)?.get(id).cloned())
    }

    async fn get_contents(&self, ids: &[String]) -> Result<Vec<Content>> {
        let contents = read(&self.contents)?;
        Ok(ids.iter().filter_map(|id| contents.get(id).cloned()).collect())
    }

    async fn list_contents(&self) -> Result<Vec<Content>> {
        Ok(read(&self.contents)?.values().cloned().collect())
    }

    async fn upsert_tribe(&self, tribe: &Tribe) -> Result<()> {
        write(&self.tribes)?.insert(tribe.id.clone(), tribe.clone());
        Ok(())
    }

    async fn get_tribe(&self, id: &str) -> Result<Option<Tribe>> {
        Ok(read(&self.tribes)?.get(id).cloned())
    }

    async fn list_tribes(&self) -> Result<Vec<Tribe>> {
        Ok(read(&self.tribes)?.values().cloned().collect())
    }

    async fn get_user(&self, user_ref: &str) -> Result<Option<UserContext>> {
        Ok(read(&self.users)?.get(user_ref).cloned())
    }

    async fn upsert_user(&self, user: &UserContext) -> Result<()> {
        write(&self.users)?.insert(user.user_ref.clone(), user.clone());
        Ok(())
    }

    async fn insert_snapshot(&self, snapshot: &ShareSnapshot) -> Result<bool> {
        let mut snapshots = write(&self.snapshots)?;
        if snapshots.contains_key(&snapshot.share_id) {
            return Ok(false);
        }
        snapshots.insert(snapshot.share_id.clone(), snapshot.clone());
        Ok(true)
    }

    async fn get_snapshot(&self, share_id: &str) -> Result<Option<ShareSnapshot>> {
        Ok(read(&self.snapshots)?.get(share_id).cloned())
    }
}
