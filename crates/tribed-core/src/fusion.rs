//! Ranking fusion.
//!
//! ```text
//! base  = w_sim · similarity + w_recency · exp(-age_days / half_life) + w_affinity · affinity
//! final = base − w_diversity · same_source_run
//! ```
//!
//! `same_source_run` is the number of consecutive items from the same
//! source ranked directly ahead of an item in the penalty-free (base)
//! order. The final order is `final` descending with content id ascending
//! on ties, so it is a pure function of the candidates, the user context,
//! the weights and `as_of`.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::config::RankingConfig;
use crate::matcher::Candidate;
use crate::models::{Content, ScoreBreakdown, UserContext};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// A candidate with its fused score.
#[derive(Debug, Clone)]
pub struct ScoredItem {
    pub content: Content,
    pub final_score: f64,
    pub breakdown: ScoreBreakdown,
}

/// Score and order `candidates` for `user` as of `as_of`.
pub fn fuse(
    candidates: Vec<Candidate>,
    user: &UserContext,
    weights: &RankingConfig,
    as_of: DateTime<Utc>,
) -> Vec<ScoredItem> {
    let mut items: Vec<(f64, ScoredItem)> = candidates
        .into_iter()
        .map(|c| {
            let similarity = c.similarity as f64;
            let age_days = ((as_of - c.content.published_at).num_milliseconds() as f64
                / MILLIS_PER_DAY)
                .max(0.0);
            let recency = (-age_days / weights.half_life_days).exp();
            let affinity = if c.content.tribe_ids.is_disjoint(&user.followed_tribes) {
                0.0
            } else {
                1.0
            };
            let breakdown = ScoreBreakdown {
                similarity,
                recency,
                age_days,
                affinity,
                same_source_run: 0,
                similarity_term: weights.w_sim * similarity,
                recency_term: weights.w_recency * recency,
                affinity_term: weights.w_affinity * affinity,
                diversity_term: 0.0,
            };
            let base = breakdown.similarity_term + breakdown.recency_term + breakdown.affinity_term;
            (
                base,
                ScoredItem {
                    content: c.content,
                    final_score: base,
                    breakdown,
                },
            )
        })
        .collect();

    items.sort_by(|a, b| by_score_then_id(a.0, &a.1.content.id, b.0, &b.1.content.id));

    let mut run = 0u32;
    for i in 0..items.len() {
        if i > 0 && items[i - 1].1.content.source_type == items[i].1.content.source_type {
            run += 1;
        } else {
            run = 0;
        }
        let item = &mut items[i].1;
        item.breakdown.same_source_run = run;
        item.breakdown.diversity_term = weights.w_diversity * run as f64;
        item.final_score -= item.breakdown.diversity_term;
    }

    let mut scored: Vec<ScoredItem> = items.into_iter().map(|(_, item)| item).collect();
    scored.sort_by(|a, b| by_score_then_id(a.final_score, &a.content.id, b.final_score, &b.content.id));
    scored
}

fn by_score_then_id(a_score: f64, a_id: &str, b_score: f64, b_id: &str) -> Ordering {
    b_score.total_cmp(&a_score).then_with(|| a_id.cmp(b_id))
}
