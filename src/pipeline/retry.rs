//! Bounded hydrate-and-retry around the collector.
//!
//! An empty first pass usually means the table had not finished rendering.
//! This is a mitigation, not a correctness guarantee: cooldown, coax more
//! content in (scroll-to-bottom rounds with a settle pause), collect again,
//! once per retry unit.

use std::time::Duration;

use tracing::{info, warn};

use crate::config::Config;
use crate::pipeline::collect::collect_assets;
use crate::pipeline::probe::SizeResolver;
use crate::pipeline::RetainedAsset;
use crate::renderer::PageContext;

const SCROLL_SCRIPT: &str = "window.scrollTo(0, document.body.scrollHeight)";

/// Run the collector, retrying on an empty result up to the configured
/// budget. Returns the first non-empty result, or the final empty one.
pub async fn collect_with_retry(
    page: &dyn PageContext,
    resolver: &SizeResolver,
    cfg: &Config,
) -> Vec<RetainedAsset> {
    let first = collect_assets(page, resolver, cfg).await;
    if !first.is_empty() || cfg.discovery_retries == 0 {
        return first;
    }

    for attempt in 1..=cfg.discovery_retries {
        warn!(
            attempt,
            budget = cfg.discovery_retries,
            "discovery found no assets, hydrating and retrying"
        );
        tokio::time::sleep(Duration::from_millis(cfg.retry_cooldown_ms)).await;
        hydrate(page, cfg).await;

        let assets = collect_assets(page, resolver, cfg).await;
        if !assets.is_empty() {
            info!(found = assets.len(), attempt, "retry pass found assets");
            return assets;
        }
    }

    Vec::new()
}

/// Supplementary content hydration: scroll to the bottom and let the page
/// settle, at least once, or as many rounds as configured.
pub async fn hydrate(page: &dyn PageContext, cfg: &Config) {
    let rounds = cfg.scroll_rounds.max(1);
    for _ in 0..rounds {
        if let Err(e) = page.evaluate(SCROLL_SCRIPT).await {
            warn!("hydration scroll failed: {e:#}");
            return;
        }
        tokio::time::sleep(Duration::from_millis(cfg.settle_ms)).await;
    }
}
