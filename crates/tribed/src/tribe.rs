//! `tribed tribe ...` commands.

use anyhow::Result;

use tribed_core::engine::NewTribe;

use crate::app;
use crate::config::Config;
use crate::feed::{print_feed, OutputOpts};

pub async fn run_create(config: &Config, new: NewTribe) -> Result<()> {
    let engine = app::open_engine(config).await?;
    let tribe = engine.create_tribe(new).await;
    app::close(engine).await;
    let tribe = tribe?;

    println!("tribe created");
    println!("  id: {}", tribe.id);
    println!("  name: {}", tribe.name);
    println!("  members: {}", tribe.member_content_ids.len());
    Ok(())
}

/// Most-followed first.
pub async fn run_list(config: &Config, limit: usize) -> Result<()> {
    let engine = app::open_engine(config).await?;
    let tribes = engine.discover_tribes(limit).await;
    app::close(engine).await;
    let tribes = tribes?;

    if tribes.is_empty() {
        println!("No tribes.");
        return Ok(());
    }
    println!("{:<38} {:>9} {:>8}  NAME", "ID", "FOLLOWERS", "MEMBERS");
    for t in tribes {
        println!(
            "{:<38} {:>9} {:>8}  {}",
            t.id,
            t.follower_count,
            t.member_content_ids.len(),
            t.name
        );
    }
    Ok(())
}

pub async fn run_follow(config: &Config, user: &str, tribe_id: &str, follow: bool) -> Result<()> {
    let engine = app::open_engine(config).await?;
    let result = if follow {
        engine.follow_tribe(user, tribe_id).await
    } else {
        engine.unfollow_tribe(user, tribe_id).await
    };
    app::close(engine).await;
    let ctx = result?;

    println!(
        "{} {} {}",
        ctx.user_ref,
        if follow { "follows" } else { "unfollowed" },
        tribe_id
    );
    println!("  following: {}", ctx.followed_tribes.len());
    Ok(())
}

pub async fn run_tribe_feed(
    config: &Config,
    tribe_id: &str,
    user: Option<&str>,
    page_size: Option<usize>,
    page_token: Option<String>,
    output: OutputOpts,
) -> Result<()> {
    let engine = app::open_engine(config).await?;
    let result = async {
        let ctx = engine.user_context(user).await?;
        engine.tribe_feed(tribe_id, &ctx, page_size, page_token).await
    }
    .await;
    app::close(engine).await;
    let feed = result?;

    if output.json {
        println!("{}", serde_json::to_string_pretty(&feed)?);
    } else {
        print_feed(&feed, output.explain);
    }
    Ok(())
}
