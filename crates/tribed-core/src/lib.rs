//! # Tribed Core
//!
//! The matching and ranking engine behind Tribed: turning a free-text
//! interest prompt into a ranked, deduplicated feed over an ingested corpus.
//!
//! This crate holds no database driver, HTTP client or CLI code. Storage is
//! reached through the [`store::Store`] trait and embeddings through the
//! [`embedding::Embedder`] trait, so the application crate decides which
//! backends to plug in.
//!
//! ## Pipeline
//!
//! ```text
//! RawRecord ─▶ normalize ─▶ Content ─▶ EmbeddingComputer ─▶ IndexStore
//!
//! prompt ─▶ EmbeddingComputer ─▶ PromptMatcher ─▶ fuse ─▶ assemble ─▶ FeedResult
//!                                                                  │
//!                                                    ShareSnapshotStore
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | `Content`, `Tribe`, `UserContext`, `FeedResult`, `ShareSnapshot` |
//! | [`normalize`] | Raw record validation, URL canonicalization, markup stripping, tagging |
//! | [`embedding`] | `Embedder` trait, deterministic hash embedder, cached/retrying computer |
//! | [`index`] | In-memory vector index with tombstones and compaction |
//! | [`matcher`] | Prompt embedding, k-NN query and hard filters |
//! | [`fusion`] | Weighted score fusion with recency, affinity and diversity |
//! | [`assemble`] | Dedup, pagination tokens and score breakdowns |
//! | [`share`] | Immutable feed snapshots behind collision-free share ids |
//! | [`store`] | Persistence contract and in-memory implementation |
//! | [`engine`] | `FeedEngine` facade wiring everything together |
//! | [`config`] | Engine settings with serde defaults and validation |
//! | [`error`] | Typed error kinds and their retry policy |

pub mod assemble;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod fusion;
pub mod index;
pub mod matcher;
pub mod models;
pub mod normalize;
pub mod share;
pub mod store;

pub use engine::FeedEngine;
pub use error::FeedError;
