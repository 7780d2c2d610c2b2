//! # Tribed CLI (`tribed`)
//!
//! ## Usage
//!
//! ```bash
//! tribed --config ./config/tribed.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tribed init` | Create the SQLite database and run schema migrations |
//! | `tribed ingest <file.jsonl>` | Normalize, embed and index scraped records |
//! | `tribed feed "<prompt>"` | Ranked, deduplicated feed for a prompt |
//! | `tribed share get <id>` | Print a shared feed snapshot |
//! | `tribed tribe create\|list\|follow\|unfollow\|feed` | Manage tribes |
//! | `tribed embed pending` | Retry missing or stale embeddings |
//! | `tribed index stats\|rebuild\|compact` | Inspect or maintain the vector index |
//! | `tribed retire <id>` | Stop serving one content item |
//! | `tribed retire-older-than <date>` | Retire content published before a date |
//! | `tribed serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! tribed ingest ./scraped/2024-05-01.jsonl
//! tribed feed "indie game dev postmortems" --source reddit --source youtube --explain
//! tribed feed "indie game dev postmortems" --share --owner alice
//! tribed tribe create "Founders" --prompt "startup founder stories" --tag founder_story
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use tribed::config;
use tribed::feed::{FeedArgs, OutputOpts};
use tribed::{embed_cmd, feed, index_cmd, ingest, logging, migrate, retire, server, tribe};
use tribed_core::engine::NewTribe;

/// Tribed: prompt-driven, tribe-aware content feeds.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/tribed.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "tribed",
    about = "Tribed: prompt-driven, tribe-aware content feeds",
    version,
    long_about = "Tribed ingests content scraped from Reddit, YouTube, Medium, podcasts, GitHub \
    and the web, embeds it, and answers natural-language prompts with ranked, deduplicated, \
    shareable feeds."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tribed.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all tables (contents, tribes,
    /// users, share_snapshots). Safe to run repeatedly.
    Init,

    /// Ingest scraped records from a JSON Lines file.
    ///
    /// Malformed lines and records are reported and skipped; valid records
    /// are normalized, deduplicated by canonical URL, embedded and indexed.
    Ingest {
        /// Path to a `.jsonl` file, one record per line.
        file: PathBuf,

        /// Validate only; nothing is written.
        #[arg(long)]
        dry_run: bool,
    },

    /// Generate a feed for a prompt.
    Feed {
        /// Natural-language prompt, e.g. "rust systems programming".
        prompt: String,

        /// Restrict to a source type (repeatable): reddit, youtube, medium,
        /// podcast, github, rss, web.
        #[arg(long = "source")]
        sources: Vec<String>,

        /// Restrict to members of a tribe (repeatable).
        #[arg(long = "tribe")]
        tribes: Vec<String>,

        /// Exclude a content id (repeatable).
        #[arg(long)]
        exclude: Vec<String>,

        /// Only content published on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        /// Only content published on or before this date (YYYY-MM-DD).
        #[arg(long)]
        until: Option<String>,

        /// Items per page.
        #[arg(long)]
        page_size: Option<usize>,

        /// Continue from a previous page's `next_page_token`.
        #[arg(long)]
        page_token: Option<String>,

        /// Rank for this user, boosting tribes they follow.
        #[arg(long)]
        user: Option<String>,

        /// Show the score breakdown of every item.
        #[arg(long)]
        explain: bool,

        /// Print the feed as JSON.
        #[arg(long)]
        json: bool,

        /// Freeze the result into a share snapshot and print its id.
        #[arg(long, requires = "owner")]
        share: bool,

        /// Owner recorded on the share snapshot.
        #[arg(long)]
        owner: Option<String>,
    },

    /// Shared feed snapshots.
    Share {
        #[command(subcommand)]
        action: ShareAction,
    },

    /// Manage tribes.
    Tribe {
        #[command(subcommand)]
        action: TribeAction,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Inspect or maintain the vector index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Retire one content item. It is never served again.
    Retire {
        /// Content id.
        id: String,
    },

    /// Retire all content published before a date (YYYY-MM-DD).
    RetireOlderThan {
        date: String,
    },

    /// Start the HTTP API.
    ///
    /// Binds to `[server].bind` and compacts the index in the background.
    Serve,
}

#[derive(Subcommand)]
enum ShareAction {
    /// Print a snapshot by share id.
    Get {
        share_id: String,
        #[arg(long)]
        explain: bool,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum TribeAction {
    /// Create a tribe. Existing content with a matching tag joins it.
    Create {
        name: String,
        /// Standing prompt for the tribe's own feed.
        #[arg(long)]
        prompt: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Membership tag (repeatable).
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// List tribes, most followed first.
    List {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Follow a tribe.
    Follow {
        tribe_id: String,
        #[arg(long)]
        user: String,
    },
    /// Unfollow a tribe.
    Unfollow {
        tribe_id: String,
        #[arg(long)]
        user: String,
    },
    /// A tribe's own feed.
    Feed {
        tribe_id: String,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        page_size: Option<usize>,
        #[arg(long)]
        page_token: Option<String>,
        #[arg(long)]
        explain: bool,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed content that has no vector under the current model.
    Pending,
}

#[derive(Subcommand)]
enum IndexAction {
    /// Print index, cache and content counters.
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Re-embed stale content and rebuild the index.
    Rebuild,
    /// Drop tombstoned entries.
    Compact,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { file, dry_run } => {
            ingest::run_ingest(&cfg, &file, dry_run).await?;
        }
        Commands::Feed {
            prompt,
            sources,
            tribes,
            exclude,
            since,
            until,
            page_size,
            page_token,
            user,
            explain,
            json,
            share,
            owner,
        } => {
            let args = FeedArgs {
                prompt,
                sources,
                tribes,
                exclude,
                since,
                until,
                page_size,
                page_token,
                user,
            };
            let owner = if share { owner.as_deref() } else { None };
            feed::run_feed(&cfg, &args, OutputOpts { explain, json }, owner).await?;
        }
        Commands::Share { action } => match action {
            ShareAction::Get {
                share_id,
                explain,
                json,
            } => {
                feed::run_share_get(&cfg, &share_id, OutputOpts { explain, json }).await?;
            }
        },
        Commands::Tribe { action } => match action {
            TribeAction::Create {
                name,
                prompt,
                description,
                tags,
            } => {
                let new = NewTribe {
                    name,
                    description,
                    prompt,
                    tags,
                };
                tribe::run_create(&cfg, new).await?;
            }
            TribeAction::List { limit } => {
                tribe::run_list(&cfg, limit).await?;
            }
            TribeAction::Follow { tribe_id, user } => {
                tribe::run_follow(&cfg, &user, &tribe_id, true).await?;
            }
            TribeAction::Unfollow { tribe_id, user } => {
                tribe::run_follow(&cfg, &user, &tribe_id, false).await?;
            }
            TribeAction::Feed {
                tribe_id,
                user,
                page_size,
                page_token,
                explain,
                json,
            } => {
                tribe::run_tribe_feed(
                    &cfg,
                    &tribe_id,
                    user.as_deref(),
                    page_size,
                    page_token,
                    OutputOpts { explain, json },
                )
                .await?;
            }
        },
        Commands::Embed { action } => match action {
            EmbedAction::Pending => {
                embed_cmd::run_embed_pending(&cfg).await?;
            }
        },
        Commands::Index { action } => match action {
            IndexAction::Stats { json } => {
                index_cmd::run_stats(&cfg, json).await?;
            }
            IndexAction::Rebuild => {
                index_cmd::run_rebuild(&cfg).await?;
            }
            IndexAction::Compact => {
                index_cmd::run_compact(&cfg).await?;
            }
        },
        Commands::Retire { id } => {
            retire::run_retire(&cfg, &id).await?;
        }
        Commands::RetireOlderThan { date } => {
            retire::run_retire_older_than(&cfg, &date).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
