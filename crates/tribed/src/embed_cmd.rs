use anyhow::Result;

use crate::app;
use crate::config::Config;

/// Embed content that failed earlier or predates the current model.
pub async fn run_embed_pending(config: &Config) -> Result<()> {
    if !config.embedding.is_enabled() {
        anyhow::bail!("Embeddings are disabled. Set [embedding] provider in config.");
    }
    let engine = app::open_engine(config).await?;
    let report = engine.embed_pending().await;
    app::close(engine).await;
    let report = report?;

    println!("embed pending");
    if report.attempted == 0 {
        println!("  all content up to date");
        return Ok(());
    }
    println!("  attempted: {}", report.attempted);
    println!("  embedded: {}", report.embedded);
    println!("  failed: {}", report.failed);
    Ok(())
}
