//! # Tribed
//!
//! **Prompt-driven, tribe-aware content feeds.**
//!
//! Tribed ingests content scraped from Reddit, YouTube, Medium, podcasts,
//! GitHub and the open web, embeds it, and answers a natural-language prompt
//! with a ranked, deduplicated, paginated feed. Feeds can be frozen into
//! share snapshots; tribes group content and boost it for their followers.
//!
//! The ranking pipeline lives in [`tribed_core`]. This crate wires it to
//! SQLite ([`sqlite_store`]), a configurable embedding backend
//! ([`embedding`]), the `tribed` CLI and an HTTP API ([`server`]).
//!
//! ```text
//! ┌────────────┐   ┌────────────┐   ┌──────────────┐
//! │ JSONL / API│──▶│ FeedEngine │──▶│    SQLite     │
//! │  ingest    │   │ (core)     │   │ contents,     │
//! └────────────┘   └─────┬──────┘   │ tribes, shares│
//!                        │          └──────────────┘
//!              ┌─────────┴─────────┐
//!              ▼                   ▼
//!         ┌──────────┐       ┌──────────┐
//!         │   CLI    │       │   HTTP   │
//!         │ (tribed) │       │  (axum)  │
//!         └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! tribed init
//! tribed ingest ./scraped.jsonl
//! tribed feed "rust systems programming" --explain
//! tribed serve
//! ```

pub mod app;
pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod feed;
pub mod index_cmd;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod retire;
pub mod server;
pub mod sqlite_store;
pub mod tribe;
