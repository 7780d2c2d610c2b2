//! In-memory vector index.
//!
//! Exact inner-product search over unit-length vectors. The corpus sizes
//! this engine targets fit a flat scan; the index keeps vectors in a
//! contiguous `Vec` so the scan is a tight loop.
//!
//! # Consistency
//!
//! - All vectors in one index share a single embedding version and
//!   dimensionality. Inserting or querying with another version fails with
//!   [`IndexError::VersionMismatch`]; the caller rebuilds.
//! - Removal marks a tombstone. Tombstoned entries are never returned and
//!   are physically dropped by [`IndexStore::compact`].
//! - Compaction takes the write lock, so a concurrent query observes either
//!   the pre- or the post-compaction entry set, never a partial one.
//! - Ties in score are broken by content id ascending.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::embedding::{dot, l2_normalize};
use crate::error::IndexError;

/// Lifecycle of an [`IndexStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Uninitialized,
    Ready,
    ShutDown,
}

/// A query hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub id: String,
    pub score: f32,
}

/// Snapshot of index counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub state: IndexState,
    pub version: Option<String>,
    pub dims: usize,
    pub live: usize,
    pub tombstones: usize,
    pub compacting: bool,
}

/// Outcome of a full rebuild.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RebuildReport {
    pub indexed: usize,
    /// Entries rejected for a wrong dimensionality or a zero vector.
    pub skipped: Vec<String>,
}

#[derive(Debug)]
struct Slot {
    id: String,
    vector: Vec<f32>,
    live: bool,
}

#[derive(Debug)]
struct IndexInner {
    state: IndexState,
    version: String,
    dims: usize,
    slots: Vec<Slot>,
    positions: HashMap<String, usize>,
    tombstones: usize,
}

impl IndexInner {
    fn empty(state: IndexState) -> Self {
        Self {
            state,
            version: String::new(),
            dims: 0,
            slots: Vec::new(),
            positions: HashMap::new(),
            tombstones: 0,
        }
    }

    fn check_ready(&self) -> Result<(), IndexError> {
        match self.state {
            IndexState::Ready => Ok(()),
            IndexState::Uninitialized => Err(IndexError::NotReady),
            IndexState::ShutDown => Err(IndexError::ShutDown),
        }
    }

    fn check_version(&self, version: &str) -> Result<(), IndexError> {
        if self.version != version {
            return Err(IndexError::VersionMismatch {
                index: self.version.clone(),
                prompt: version.to_string(),
            });
        }
        Ok(())
    }

    fn prepare(&self, id: &str, mut vector: Vec<f32>) -> Result<Vec<f32>, IndexError> {
        if vector.len() != self.dims {
            return Err(IndexError::DimensionMismatch {
                id: id.to_string(),
                expected: self.dims,
                actual: vector.len(),
            });
        }
        if !l2_normalize(&mut vector) {
            return Err(IndexError::Corrupted {
                id: id.to_string(),
                reason: "zero or non-finite vector".into(),
            });
        }
        Ok(vector)
    }

    fn upsert(&mut self, id: String, vector: Vec<f32>) {
        match self.positions.get(&id) {
            Some(&pos) => {
                let slot = &mut self.slots[pos];
                if !slot.live {
                    slot.live = true;
                    self.tombstones -= 1;
                }
                slot.vector = vector;
            }
            None => {
                self.positions.insert(id.clone(), self.slots.len());
                self.slots.push(Slot {
                    id,
                    vector,
                    live: true,
                });
            }
        }
    }
}

/// Candidate ordering for the bounded top-k heap: the heap's maximum is the
/// worst candidate (lowest score, then highest id).
#[derive(Debug)]
struct Candidate<'a> {
    score: f32,
    id: &'a str,
}

impl PartialEq for Candidate<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate<'_> {}

impl PartialOrd for Candidate<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.id.cmp(other.id))
    }
}

/// Shared vector index. Cheap to query from many tasks at once.
#[derive(Debug)]
pub struct IndexStore {
    inner: RwLock<IndexInner>,
    compacting: AtomicBool,
}

impl Default for IndexStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexStore {
    /// An uninitialized index; queries fail with [`IndexError::NotReady`]
    /// until [`rebuild`](Self::rebuild) runs.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(IndexInner::empty(IndexState::Uninitialized)),
            compacting: AtomicBool::new(false),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the whole entry set with vectors of `version`. The new set is
    /// built outside the lock and swapped in atomically, so queries keep
    /// running against the old set meanwhile.
    pub fn rebuild<I>(&self, version: &str, dims: usize, entries: I) -> Result<RebuildReport, IndexError>
    where
        I: IntoIterator<Item = (String, Vec<f32>)>,
    {
        if self.read().state == IndexState::ShutDown {
            return Err(IndexError::ShutDown);
        }

        let mut fresh = IndexInner::empty(IndexState::Ready);
        fresh.version = version.to_string();
        fresh.dims = dims;
        let mut report = RebuildReport::default();
        for (id, vector) in entries {
            match fresh.prepare(&id, vector) {
                Ok(vector) => fresh.upsert(id, vector),
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "skipping index entry");
                    report.skipped.push(id);
                }
            }
        }
        report.indexed = fresh.slots.len();

        let mut inner = self.write();
        if inner.state == IndexState::ShutDown {
            return Err(IndexError::ShutDown);
        }
        *inner = fresh;
        tracing::info!(
            version = %version,
            dims,
            indexed = report.indexed,
            skipped = report.skipped.len(),
            "index rebuilt"
        );
        Ok(report)
    }

    /// Add or replace the vector for `id`.
    pub fn insert(&self, id: &str, vector: Vec<f32>, version: &str) -> Result<(), IndexError> {
        let mut inner = self.write();
        inner.check_ready()?;
        inner.check_version(version)?;
        let vector = inner.prepare(id, vector)?;
        inner.upsert(id.to_string(), vector);
        Ok(())
    }

    /// Tombstone `id`. Returns `false` if it was not live.
    pub fn remove(&self, id: &str) -> bool {
        let mut inner = self.write();
        let Some(&pos) = inner.positions.get(id) else {
            return false;
        };
        let slot = &mut inner.slots[pos];
        if !slot.live {
            return false;
        }
        slot.live = false;
        slot.vector = Vec::new();
        inner.tombstones += 1;
        true
    }

    /// Whether `id` is live in the index.
    pub fn contains(&self, id: &str) -> bool {
        let inner = self.read();
        inner
            .positions
            .get(id)
            .map_or(false, |&pos| inner.slots[pos].live)
    }

    /// Top-`k` live entries by inner product with `vector`, best first.
    /// Fails with [`IndexError::Compacting`] while a compaction runs.
    pub fn query(&self, vector: &[f32], k: usize, version: &str) -> Result<Vec<Neighbor>, IndexError> {
        if self.compacting.load(AtomicOrdering::Acquire) {
            return Err(IndexError::Compacting);
        }
        let inner = self.read();
        inner.check_ready()?;
        inner.check_version(version)?;
        if vector.len() != inner.dims {
            return Err(IndexError::DimensionMismatch {
                id: "<query>".into(),
                expected: inner.dims,
                actual: vector.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut heap: BinaryHeap<Candidate<'_>> = BinaryHeap::with_capacity(k + 1);
        for slot in inner.slots.iter().filter(|s| s.live) {
            let candidate = Candidate {
                score: dot(vector, &slot.vector),
                id: &slot.id,
            };
            if heap.len() < k {
                heap.push(candidate);
            } else if heap.peek().map_or(false, |worst| candidate < *worst) {
                heap.pop();
                heap.push(candidate);
            }
        }

        Ok(heap
            .into_sorted_vec()
            .into_iter()
            .map(|c| Neighbor {
                id: c.id.to_string(),
                score: c.score,
            })
            .collect())
    }

    /// Drop tombstoned entries. Returns how many were dropped. A second
    /// caller while one compaction runs gets [`IndexError::Compacting`].
    pub fn compact(&self) -> Result<usize, IndexError> {
        if self
            .compacting
            .compare_exchange(false, true, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
            .is_err()
        {
            return Err(IndexError::Compacting);
        }
        let _reset = CompactingFlag(&self.compacting);

        let mut inner = self.write();
        inner.check_ready()?;
        let before = inner.slots.len();
        inner.slots.retain(|s| s.live);
        let positions = inner
            .slots
            .iter()
            .enumerate()
            .map(|(pos, s)| (s.id.clone(), pos))
            .collect();
        inner.positions = positions;
        inner.tombstones = 0;
        let dropped = before - inner.slots.len();
        tracing::debug!(dropped, live = inner.slots.len(), "index compacted");
        Ok(dropped)
    }

    /// Whether tombstones exceed `ratio` of stored entries.
    pub fn needs_compaction(&self, ratio: f64) -> bool {
        let inner = self.read();
        !inner.slots.is_empty() && inner.tombstones as f64 / inner.slots.len() as f64 > ratio
    }

    /// Release all entries and refuse further work.
    pub fn shutdown(&self) {
        *self.write() = IndexInner::empty(IndexState::ShutDown);
        tracing::info!("index shut down");
    }

    pub fn state(&self) -> IndexState {
        self.read().state
    }

    /// Version of the vectors held, if the index was built.
    pub fn version(&self) -> Option<String> {
        let inner = self.read();
        (inner.state == IndexState::Ready).then(|| inner.version.clone())
    }

    pub fn stats(&self) -> IndexStats {
        let inner = self.read();
        IndexStats {
            state: inner.state,
            version: (inner.state == IndexState::Ready).then(|| inner.version.clone()),
            dims: inner.dims,
            live: inner.slots.len() - inner.tombstones,
            tombstones: inner.tombstones,
            compacting: self.compacting.load(AtomicOrdering::Acquire),
        }
    }
}

struct CompactingFlag<'a>(&'a AtomicBool);

impl Drop for CompactingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, AtomicOrdering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ready(entries: Vec<(&str, Vec<f32>)>) -> IndexStore {
        let index = IndexStore::new();
        index
            .rebuild(
                "v1",
                2,
                entries.into_iter().map(|(id, v)| (id.to_string(), v)),
            )
            .unwrap();
        index
    }

    fn ids(hits: &[Neighbor]) -> Vec<&str> {
        hits.iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn test_uninitialized_index_not_ready() {
        let index = IndexStore::new();
        assert_eq!(index.query(&[1.0, 0.0], 5, "v1"), Err(IndexError::NotReady));
        assert_eq!(
            index.insert("a", vec![1.0, 0.0], "v1"),
            Err(IndexError::NotReady)
        );
    }

    #[test]
    fn test_query_orders_by_score() {
        let index = ready(vec![
            ("far", vec![0.0, 1.0]),
            ("near", vec![1.0, 0.1]),
            ("mid", vec![1.0, 1.0]),
        ]);
        let hits = index.query(&[1.0, 0.0], 10, "v1").unwrap();
        assert_eq!(ids(&hits), vec!["near", "mid", "far"]);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_ties_broken_by_id() {
        let index = ready(vec![
            ("c", vec![1.0, 0.0]),
            ("a", vec![1.0, 0.0]),
            ("b", vec![1.0, 0.0]),
        ]);
        let hits = index.query(&[1.0, 0.0], 2, "v1").unwrap();
        assert_eq!(ids(&hits), vec!["a", "b"]);
    }

    #[test]
    fn test_top_k_bounded() {
        let entries: Vec<(String, Vec<f32>)> = (0..50)
            .map(|i| (format!("id{:02}", i), vec![1.0, i as f32 / 10.0]))
            .collect();
        let index = IndexStore::new();
        index.rebuild("v1", 2, entries).unwrap();
        let hits = index.query(&[1.0, 0.0], 3, "v1").unwrap();
        assert_eq!(ids(&hits), vec!["id00", "id01", "id02"]);
        assert!(index.query(&[1.0, 0.0], 0, "v1").unwrap().is_empty());
    }

    #[test]
    fn test_removed_never_returned() {
        let index = ready(vec![("a", vec![1.0, 0.0]), ("b", vec![0.9, 0.1])]);
        assert!(index.remove("a"));
        assert!(!index.remove("a"));
        assert!(!index.contains("a"));
        let hits = index.query(&[1.0, 0.0], 10, "v1").unwrap();
        assert_eq!(ids(&hits), vec!["b"]);
        assert_eq!(index.stats().tombstones, 1);
    }

    #[test]
    fn test_reinsert_revives_tombstone() {
        let index = ready(vec![("a", vec![1.0, 0.0])]);
        index.remove("a");
        index.insert("a", vec![0.0, 1.0], "v1").unwrap();
        let stats = index.stats();
        assert_eq!(stats.live, 1);
        assert_eq!(stats.tombstones, 0);
        let hits = index.query(&[0.0, 1.0], 1, "v1").unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_compact_drops_tombstones_and_keeps_results() {
        let index = ready(vec![
            ("a", vec![1.0, 0.0]),
            ("b", vec![0.8, 0.2]),
            ("c", vec![0.1, 0.9]),
        ]);
        index.remove("b");
        let before = index.query(&[1.0, 0.0], 10, "v1").unwrap();
        assert!(index.needs_compaction(0.25));
        assert_eq!(index.compact().unwrap(), 1);
        assert!(!index.needs_compaction(0.25));
        let after = index.query(&[1.0, 0.0], 10, "v1").unwrap();
        assert_eq!(before, after);
        assert_eq!(index.stats().live, 2);
    }

    #[test]
    fn test_version_mismatch() {
        let index = ready(vec![("a", vec![1.0, 0.0])]);
        assert_eq!(
            index.query(&[1.0, 0.0], 1, "v2"),
            Err(IndexError::VersionMismatch {
                index: "v1".into(),
                prompt: "v2".into()
            })
        );
        assert!(matches!(
            index.insert("b", vec![1.0, 0.0], "v2"),
            Err(IndexError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_dimension_checks() {
        let index = ready(vec![("a", vec![1.0, 0.0])]);
        assert!(matches!(
            index.insert("b", vec![1.0, 0.0, 0.0], "v1"),
            Err(IndexError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            index.insert("z", vec![0.0, 0.0], "v1"),
            Err(IndexError::Corrupted { .. })
        ));
    }

    #[test]
    fn test_rebuild_skips_bad_entries() {
        let index = IndexStore::new();
        let report = index
            .rebuild(
                "v1",
                2,
                vec![
                    ("ok".to_string(), vec![1.0, 0.0]),
                    ("short".to_string(), vec![1.0]),
                    ("zero".to_string(), vec![0.0, 0.0]),
                ],
            )
            .unwrap();
        assert_eq!(report.indexed, 1);
        assert_eq!(report.skipped, vec!["short".to_string(), "zero".to_string()]);
        assert_eq!(index.version().as_deref(), Some("v1"));
    }

    #[test]
    fn test_shutdown_refuses_work() {
        let index = ready(vec![("a", vec![1.0, 0.0])]);
        index.shutdown();
        assert_eq!(index.query(&[1.0, 0.0], 1, "v1"), Err(IndexError::ShutDown));
        assert_eq!(
            index.rebuild("v1", 2, Vec::new()),
            Err(IndexError::ShutDown)
        );
        assert_eq!(index.state(), IndexState::ShutDown);
    }

    #[test]
    fn test_queries_during_compaction_see_whole_sets() {
        let entries: Vec<(String, Vec<f32>)> = (0..200)
            .map(|i| (format!("id{:03}", i), vec![1.0, i as f32]))
            .collect();
        let index = Arc::new(IndexStore::new());
        index.rebuild("v1", 2, entries).unwrap();
        for i in (1..200).step_by(2) {
            index.remove(&format!("id{:03}", i));
        }
        let expected = index.query(&[1.0, 0.0], 500, "v1").unwrap();

        let reader = {
            let index = index.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    match index.query(&[1.0, 0.0], 500, "v1") {
                        Ok(hits) => assert_eq!(hits.len(), 100),
                        Err(e) => assert_eq!(e, IndexError::Compacting),
                    }
                }
            })
        };
        index.compact().unwrap();
        reader.join().unwrap();
        assert_eq!(index.query(&[1.0, 0.0], 500, "v1").unwrap(), expected);
    }

    #[test]
    fn test_query_fails_fast_while_compacting() {
        let index = ready(vec![("a", vec![1.0, 0.0])]);
        index.compacting.store(true, AtomicOrdering::Release);
        assert_eq!(index.query(&[1.0, 0.0], 1, "v1"), Err(IndexError::Compacting));
        assert_eq!(index.compact(), Err(IndexError::Compacting));

        // Writers wait on the lock instead.
        index.insert("b", vec![0.0, 1.0], "v1").unwrap();
        assert!(index.contains("b"));

        index.compacting.store(false, AtomicOrdering::Release);
        assert_eq!(index.query(&[0.0, 1.0], 1, "v1").unwrap()[0].id, "b");
    }
}
