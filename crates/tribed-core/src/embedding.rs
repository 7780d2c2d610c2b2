//! Embedding backends, the cached/retrying computer, and vector helpers.
//!
//! Backends implement [`Embedder`]. The application crate provides the
//! network-backed ones; this crate ships [`HashEmbedder`], a deterministic
//! feature-hashing model that needs no network and is what tests run
//! against, and [`DisabledEmbedder`].
//!
//! [`EmbeddingComputer`] wraps the active backend with a bounded cache keyed
//! by text hash and model version, a per-call timeout and exponential
//! backoff on transient failures.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::RetryPolicy;
use crate::error::EmbeddingError;
use crate::normalize::hash_text;

const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// A text embedding model.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model version tag; vectors from different versions are incomparable.
    fn version(&self) -> &str;
    /// Vector dimensionality.
    fn dims(&self) -> usize;
    /// Embed `text` with model `version`. Backends must refuse versions they
    /// do not serve.
    async fn embed(&self, text: &str, version: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Deterministic bag-of-words embedder using signed feature hashing.
///
/// Each lower-cased alphanumeric token is hashed together with the version
/// tag into one of `dims` buckets. Texts sharing tokens get a high inner
/// product; changing the version changes every vector.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    version: String,
    dims: usize,
}

impl HashEmbedder {
    pub fn new(version: impl Into<String>, dims: usize) -> Self {
        Self {
            version: version.into(),
            dims: dims.max(1),
        }
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = Sha256::new();
            hasher.update(self.version.as_bytes());
            hasher.update([0u8]);
            hasher.update(token.to_lowercase().as_bytes());
            let digest = hasher.finalize();
            let mut idx = [0u8; 8];
            idx.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(idx) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vec[bucket] += sign;
        }
        vec
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn version(&self) -> &str {
        &self.version
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str, version: &str) -> Result<Vec<f32>, EmbeddingError> {
        if version != self.version {
            return Err(EmbeddingError::UnsupportedVersion {
                requested: version.to_string(),
                served: self.version.clone(),
            });
        }
        let mut vec = self.vector(text);
        if !l2_normalize(&mut vec) {
            return Err(EmbeddingError::EmptyInput);
        }
        Ok(vec)
    }
}

/// Backend used when `embedding.provider = "disabled"`.
#[derive(Debug, Clone, Default)]
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn version(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed(&self, _text: &str, _version: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Disabled)
    }
}

/// A computed vector and the model version that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub version: String,
}

/// Cache counters reported by `index stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug)]
struct EmbeddingCache {
    capacity: usize,
    entries: HashMap<String, Vec<f32>>,
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
}

impl EmbeddingCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
            hits: 0,
            misses: 0,
        }
    }

    fn get(&mut self, key: &str) -> Option<Vec<f32>> {
        match self.entries.get(key) {
            Some(v) => {
                self.hits += 1;
                Some(v.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    fn put(&mut self, key: String, vector: Vec<f32>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(key.clone(), vector).is_none() {
            self.order.push_back(key);
        }
        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    fn retain_version(&mut self, version: &str) {
        let prefix = format!("{}:", version);
        self.entries.retain(|k, _| k.starts_with(&prefix));
        let entries = &self.entries;
        self.order.retain(|k| entries.contains_key(k));
    }
}

/// Embeds text through the active [`Embedder`] with caching, a timeout and
/// bounded retries.
pub struct EmbeddingComputer {
    embedder: RwLock<Arc<dyn Embedder>>,
    cache: Mutex<EmbeddingCache>,
    retry: RetryPolicy,
}

impl EmbeddingComputer {
    pub fn new(embedder: Arc<dyn Embedder>, retry: RetryPolicy, cache_capacity: Option<usize>) -> Self {
        Self {
            embedder: RwLock::new(embedder),
            cache: Mutex::new(EmbeddingCache::new(
                cache_capacity.unwrap_or(DEFAULT_CACHE_CAPACITY),
            )),
            retry,
        }
    }

    fn current(&self) -> Arc<dyn Embedder> {
        self.embedder
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Version tag of the active model.
    pub fn version(&self) -> String {
        self.current().version().to_string()
    }

    pub fn dims(&self) -> usize {
        self.current().dims()
    }

    /// Switch to another model. Cache entries of other versions are dropped;
    /// stored vectors become stale and the index must be rebuilt.
    pub fn set_embedder(&self, embedder: Arc<dyn Embedder>) {
        let version = embedder.version().to_string();
        *self.embedder.write().unwrap_or_else(PoisonError::into_inner) = embedder;
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain_version(&version);
        tracing::info!(version = %version, "embedding model switched");
    }

    pub fn cache_stats(&self) -> CacheStats {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        CacheStats {
            entries: cache.entries.len(),
            capacity: cache.capacity,
            hits: cache.hits,
            misses: cache.misses,
        }
    }

    /// Embed `text` with the active model. The result is L2-normalized; a
    /// zero vector from the backend counts as [`EmbeddingError::EmptyInput`].
    ///
    /// Transient failures (timeouts, unavailability) are retried up to
    /// `max_attempts` with exponential backoff, then reported as
    /// [`EmbeddingError::Exhausted`]. Other failures return immediately.
    pub async fn compute(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        let embedder = self.current();
        let version = embedder.version().to_string();
        let key = format!("{}:{}", version, hash_text(text));

        let cached = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key);
        if let Some(vector) = cached {
            return Ok(Embedding { vector, version });
        }

        let attempts = self.retry.max_attempts.max(1);
        let mut last = EmbeddingError::Unavailable("no attempt made".into());
        for attempt in 1..=attempts {
            let outcome =
                tokio::time::timeout(self.retry.timeout(), embedder.embed(text, &version)).await;
            match outcome {
                Ok(Ok(mut vector)) => {
                    check_vector(&vector, embedder.dims())?;
                    // Unit length regardless of backend.
                    if !l2_normalize(&mut vector) {
                        return Err(EmbeddingError::EmptyInput);
                    }
                    self.cache
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .put(key, vector.clone());
                    return Ok(Embedding { vector, version });
                }
                Ok(Err(e)) if e.is_transient() => last = e,
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    last = EmbeddingError::Timeout {
                        after_ms: self.retry.timeout_ms,
                    }
                }
            }
            if attempt < attempts {
                let delay = self.retry.backoff(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %last,
                    "embedding attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(EmbeddingError::Exhausted {
            attempts,
            last: Box::new(last),
        })
    }
}

fn check_vector(vector: &[f32], dims: usize) -> Result<(), EmbeddingError> {
    if vector.len() != dims {
        return Err(EmbeddingError::DimensionMismatch {
            expected: dims,
            actual: vector.len(),
        });
    }
    if vector.iter().any(|x| !x.is_finite()) {
        return Err(EmbeddingError::Unavailable(
            "model returned non-finite values".into(),
        ));
    }
    Ok(())
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`]. `None` if the length is not a
/// multiple of four.
pub fn blob_to_vec(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

/// Inner product. Vectors in the index are unit length, so this is their
/// cosine similarity.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Scale `vec` to unit length in place. Returns `false` (leaving `vec`
/// untouched) for a zero or non-finite norm.
pub fn l2_normalize(vec: &mut [f32]) -> bool {
    let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !norm.is_finite() || norm < f32::EPSILON {
        return false;
    }
    for x in vec.iter_mut() {
        *x /= norm;
    }
    true
}
