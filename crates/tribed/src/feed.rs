//! `tribed feed` and `tribed share get`.

use std::collections::BTreeSet;

use anyhow::Result;

use tribed_core::models::{FeedFilters, FeedRequest, FeedResult, SourceType, TimeWindow};

use crate::app;
use crate::config::Config;

/// Command-line form of a feed request.
#[derive(Debug, Clone, Default)]
pub struct FeedArgs {
    pub prompt: String,
    pub sources: Vec<String>,
    pub tribes: Vec<String>,
    pub exclude: Vec<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub page_size: Option<usize>,
    pub page_token: Option<String>,
    pub user: Option<String>,
}

/// How to print a feed.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputOpts {
    pub explain: bool,
    pub json: bool,
}

impl FeedArgs {
    pub fn to_request(&self) -> Result<FeedRequest> {
        let source_types = self
            .sources
            .iter()
            .map(|s| s.parse::<SourceType>())
            .collect::<Result<BTreeSet<_>, _>>()?;

        let since = self.since.as_deref().map(app::parse_date).transpose()?;
        // `--until` names a day; include all of it.
        let until = self
            .until
            .as_deref()
            .map(app::parse_date)
            .transpose()?
            .map(|d| d + chrono::Duration::days(1) - chrono::Duration::milliseconds(1));
        let time_window = (since.is_some() || until.is_some()).then_some(TimeWindow { since, until });

        Ok(FeedRequest {
            prompt: self.prompt.clone(),
            filters: FeedFilters {
                tribe_ids: self.tribes.iter().cloned().collect(),
                source_types,
                exclude_ids: self.exclude.iter().cloned().collect(),
                time_window,
            },
            page_size: self.page_size,
            page_token: self.page_token.clone(),
        })
    }
}

pub async fn run_feed(
    config: &Config,
    args: &FeedArgs,
    output: OutputOpts,
    share_owner: Option<&str>,
) -> Result<()> {
    let request = args.to_request()?;
    let engine = app::open_engine(config).await?;
    let user = engine.user_context(args.user.as_deref()).await?;

    let feed = engine.generate_feed(&request, &user).await?;

    let share_id = match share_owner {
        Some(owner) => Some(engine.create_share(&feed, owner).await?.share_id),
        None => None,
    };
    app::close(engine).await;

    if output.json {
        let mut value = serde_json::to_value(&feed)?;
        if let (Some(id), Some(obj)) = (&share_id, value.as_object_mut()) {
            obj.insert("share_id".into(), serde_json::Value::String(id.clone()));
        }
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    print_feed(&feed, output.explain);
    if let Some(id) = share_id {
        println!("share_id: {}", id);
    }
    Ok(())
}

pub async fn run_share_get(config: &Config, share_id: &str, output: OutputOpts) -> Result<()> {
    let engine = app::open_engine(config).await?;
    let snapshot = engine.get_shared_feed(share_id).await;
    app::close(engine).await;
    let snapshot = snapshot?;

    if output.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }
    println!("share {}", snapshot.share_id);
    println!("  owner: {}", snapshot.owner_ref);
    println!("  created_at: {}", snapshot.created_at.to_rfc3339());
    print_feed(&snapshot.feed, output.explain);
    Ok(())
}

pub fn print_feed(feed: &FeedResult, explain: bool) {
    println!("feed \"{}\"", feed.prompt);
    println!("  as_of: {}", feed.as_of.to_rfc3339());
    println!("  embedding_version: {}", feed.embedding_version);

    if feed.items.is_empty() {
        println!("No results.");
    }
    for (i, item) in feed.items.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} ({})",
            i + 1,
            item.final_score,
            item.title,
            item.source_type
        );
        println!("    url: {}", item.url);
        println!("    id: {}", item.content_id);
        println!("    published: {}", item.published_at.format("%Y-%m-%d"));
        if explain {
            let b = &item.score_breakdown;
            println!(
                "    similarity {:.4} x w = {:.4}",
                b.similarity, b.similarity_term
            );
            println!(
                "    recency {:.4} ({:.1} days) x w = {:.4}",
                b.recency, b.age_days, b.recency_term
            );
            println!("    affinity {:.1} x w = {:.4}", b.affinity, b.affinity_term);
            println!(
                "    diversity run {} -> -{:.4}",
                b.same_source_run, b.diversity_term
            );
        }
    }

    if let Some(token) = &feed.next_page_token {
        println!("next_page_token: {}", token);
    }
}
