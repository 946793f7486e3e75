//! Cross-frame collection: discover, resolve, filter, merge, dedup.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::config::Config;
use crate::pipeline::discover::scan_frame;
use crate::pipeline::probe::SizeResolver;
use crate::pipeline::{CandidateAsset, RetainedAsset};
use crate::renderer::PageContext;

/// One collection pass over every frame of the page.
///
/// Per frame: scan for candidates, resolve each size (with the inter-probe
/// pause), keep candidates at or above the threshold, tag with the frame
/// index. Frames fail independently; a bad frame contributes nothing.
/// The merged result is deduplicated by URL, first occurrence wins
/// (earliest frame index, then discovery order within that frame).
pub async fn collect_assets(
    page: &dyn PageContext,
    resolver: &SizeResolver,
    cfg: &Config,
) -> Vec<RetainedAsset> {
    let frames = match page.frames().await {
        Ok(frames) => frames,
        Err(e) => {
            warn!("frame enumeration failed: {e:#}");
            return Vec::new();
        }
    };

    let mut retained = Vec::new();
    for frame in &frames {
        let urls = scan_frame(frame.as_ref(), &cfg.scan).await;
        debug!(frame = frame.index(), candidates = urls.len(), "frame scanned");

        let mut first_probe = true;
        for url in urls {
            if !first_probe {
                resolver.pause().await;
            }
            first_probe = false;

            let candidate = CandidateAsset {
                url,
                frame_index: frame.index(),
                size: None,
            };
            let size = resolver.resolve(frame.as_ref(), &candidate.url).await;
            if size >= cfg.min_bytes {
                retained.push(RetainedAsset {
                    url: candidate.url,
                    frame_index: candidate.frame_index,
                    size,
                });
            } else {
                debug!(
                    url = candidate.url,
                    size,
                    threshold = cfg.min_bytes,
                    "candidate excluded (below threshold or unresolved)"
                );
            }
        }
    }

    dedup_first_seen(retained)
}

/// Keep the first occurrence of each URL. Input order is frame order then
/// discovery order, so the survivor is the earliest sighting.
pub fn dedup_first_seen(assets: Vec<RetainedAsset>) -> Vec<RetainedAsset> {
    let mut seen = HashSet::new();
    assets
        .into_iter()
        .filter(|a| seen.insert(a.url.clone()))
        .collect()
}
