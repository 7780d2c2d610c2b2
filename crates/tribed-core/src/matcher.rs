//! Prompt matching: embed the prompt, query the index, apply hard filters.

use crate::embedding::EmbeddingComputer;
use crate::error::{EmbeddingError, FeedError, IndexError};
use crate::index::IndexStore;
use crate::models::{Content, ContentStatus, FeedFilters};
use crate::store::Store;

/// A content that survived the hard filters, with its raw similarity.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub content: Content,
    pub similarity: f32,
}

/// Result of matching one prompt.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    /// In index order: similarity descending, id ascending on ties.
    pub candidates: Vec<Candidate>,
    pub embedding_version: String,
}

/// Borrows the engine's parts for one matching pass.
pub struct PromptMatcher<'a, S: Store + ?Sized> {
    pub computer: &'a EmbeddingComputer,
    pub index: &'a IndexStore,
    pub store: &'a S,
}

impl<'a, S: Store + ?Sized> PromptMatcher<'a, S> {
    pub fn new(computer: &'a EmbeddingComputer, index: &'a IndexStore, store: &'a S) -> Self {
        Self {
            computer,
            index,
            store,
        }
    }

    /// Top-`k` index neighbours of `prompt` that pass `filters`.
    ///
    /// The prompt is embedded with the active model version; an index
    /// holding another version yields [`IndexError::VersionMismatch`].
    /// Candidates whose stored status is no longer `Indexed` are dropped, so
    /// a retirement racing with the query never surfaces.
    pub async fn candidates(
        &self,
        prompt: &str,
        filters: &FeedFilters,
        k: usize,
    ) -> Result<MatchOutcome, FeedError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(FeedError::InvalidPrompt);
        }

        // A prompt of only punctuation or symbols embeds to nothing.
        let embedded = match self.computer.compute(prompt).await {
            Err(EmbeddingError::EmptyInput) => return Err(FeedError::InvalidPrompt),
            other => other?,
        };
        if let Some(index_version) = self.index.version() {
            if index_version != embedded.version {
                return Err(IndexError::VersionMismatch {
                    index: index_version,
                    prompt: embedded.version,
                }
                .into());
            }
        }
        let neighbors = self.index.query(&embedded.vector, k, &embedded.version)?;

        let ids: Vec<String> = neighbors.iter().map(|n| n.id.clone()).collect();
        let contents = self.store.get_contents(&ids).await?;
        let mut by_id: std::collections::HashMap<String, Content> =
            contents.into_iter().map(|c| (c.id.clone(), c)).collect();

        let candidates = neighbors
            .into_iter()
            .filter_map(|n| {
                by_id.remove(&n.id).map(|content| Candidate {
                    content,
                    similarity: n.score,
                })
            })
            .filter(|c| passes(&c.content, filters))
            .collect();

        Ok(MatchOutcome {
            candidates,
            embedding_version: embedded.version,
        })
    }
}

/// Hard filters. Empty sets mean no restriction.
pub fn passes(content: &Content, filters: &FeedFilters) -> bool {
    if content.status != ContentStatus::Indexed {
        return false;
    }
    if filters.exclude_ids.contains(&content.id) {
        return false;
    }
    if !filters.source_types.is_empty() && !filters.source_types.contains(&content.source_type) {
        return false;
    }
    if !filters.tribe_ids.is_empty() && filters.tribe_ids.is_disjoint(&content.tribe_ids) {
        return false;
    }
    if let Some(window) = &filters.time_window {
        if !window.contains(content.published_at) {
            return false;
        }
    }
    true
}
