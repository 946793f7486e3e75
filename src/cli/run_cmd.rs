//! The default subcommand: one full harvest run.

use anyhow::Result;
use tracing::info;

use crate::config::Config;
use crate::run;

pub async fn run() -> Result<()> {
    let cfg = Config::from_env();
    info!(
        target = %cfg.target_url,
        min_bytes = cfg.min_bytes,
        headless = cfg.headless,
        "starting harvest"
    );

    let summary = run::execute(cfg).await?;

    println!("Harvest complete");
    println!("  output:     {}", summary.out_dir.display());
    println!("  retained:   {}", summary.retained);
    println!("  downloaded: {}", summary.downloaded);
    println!("  failed:     {}", summary.failed);
    Ok(())
}
