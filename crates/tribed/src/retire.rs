use anyhow::Result;

use crate::app;
use crate::config::Config;

pub async fn run_retire(config: &Config, id: &str) -> Result<()> {
    let engine = app::open_engine(config).await?;
    let changed = engine.retire(id).await;
    app::close(engine).await;

    if changed? {
        println!("retired {}", id);
    } else {
        println!("{} was already retired", id);
    }
    Ok(())
}

pub async fn run_retire_older_than(config: &Config, date: &str) -> Result<()> {
    let cutoff = app::parse_date(date)?;
    let engine = app::open_engine(config).await?;
    let retired = engine.retire_older_than(cutoff).await;
    app::close(engine).await;

    println!("retire-older-than {}", date);
    println!("  retired: {}", retired?);
    Ok(())
}
