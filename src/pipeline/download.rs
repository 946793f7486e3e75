//! Download orchestration: the ordered, fallback strategy chain.
//!
//! Per retained asset, each eligible strategy is attempted in chain order
//! and the first success terminates the chain. One asset's exhaustion
//! never aborts the batch. Downloads are deliberately serialized with an
//! inter-download pause (origin politeness, not a technical limitation).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use base64::Engine;
use tracing::{error, info, warn};

use crate::pipeline::sanitize::{name_from_url, sanitize_name};
use crate::pipeline::{DownloadOutcome, RetainedAsset, Strategy};
use crate::renderer::{js_string, FrameContext, PageContext};

/// Runs the strategy chain for each retained asset and persists results
/// into the run's output directory.
pub struct Orchestrator {
    http: reqwest::Client,
    cookie_header: Option<String>,
    out_dir: PathBuf,
    base_url: Option<String>,
    dl_timeout_ms: u64,
    pause_between_ms: u64,
}

impl Orchestrator {
    pub fn new(
        http: reqwest::Client,
        out_dir: &Path,
        dl_timeout_ms: u64,
        pause_between_ms: u64,
    ) -> Self {
        Self {
            http,
            cookie_header: None,
            out_dir: out_dir.to_path_buf(),
            base_url: None,
            dl_timeout_ms,
            pause_between_ms,
        }
    }

    /// Attach the session's `Cookie` header to direct fetches.
    pub fn with_cookie_header(mut self, header: Option<String>) -> Self {
        self.cookie_header = header;
        self
    }

    /// Base URL for resolving relative asset URLs when deriving names.
    pub fn with_base_url(mut self, base: Option<String>) -> Self {
        self.base_url = base;
        self
    }

    /// Download every asset, in discovery order, serialized.
    pub async fn run(
        &self,
        page: &dyn PageContext,
        assets: &[RetainedAsset],
    ) -> Vec<DownloadOutcome> {
        // Frame handles from the collection pass may be stale by now;
        // re-snapshot once and index by the asset's origin frame.
        let frames = match page.frames().await {
            Ok(frames) => frames,
            Err(e) => {
                warn!("frame re-enumeration failed, frame-bound strategies unavailable: {e:#}");
                Vec::new()
            }
        };

        let mut outcomes = Vec::with_capacity(assets.len());
        for (index, asset) in assets.iter().enumerate() {
            let outcome = self.download_one(page, &frames, asset, index).await;
            outcomes.push(outcome);
            if index + 1 < assets.len() && self.pause_between_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.pause_between_ms)).await;
            }
        }
        outcomes
    }

    async fn download_one(
        &self,
        page: &dyn PageContext,
        frames: &[Box<dyn FrameContext>],
        asset: &RetainedAsset,
        index: usize,
    ) -> DownloadOutcome {
        let derived = sanitize_name(&name_from_url(&asset.url, self.base_url.as_deref(), index));
        let frame = frames.get(asset.frame_index);

        for strategy in Strategy::chain_for(asset.class()) {
            let attempt = match strategy {
                Strategy::InlineExtraction => match frame {
                    Some(f) => self.inline_extract(f.as_ref(), asset, &derived, index).await,
                    None => Err(anyhow!("owning frame is no longer present")),
                },
                Strategy::TriggeredDownload => match frame {
                    Some(f) => self.triggered(f.as_ref(), page, asset, &derived, index).await,
                    None => Err(anyhow!("owning frame is no longer present")),
                },
                Strategy::AuthenticatedFetch => self.fetch(asset, &derived, index).await,
            };
            match attempt {
                Ok(path) => {
                    info!(
                        url = asset.url,
                        frame = asset.frame_index,
                        strategy = ?strategy,
                        path = %path.display(),
                        "downloaded"
                    );
                    return DownloadOutcome {
                        asset: asset.clone(),
                        strategy: Some(*strategy),
                        success: true,
                        saved_path: Some(path),
                    };
                }
                Err(e) => {
                    warn!(
                        url = asset.url,
                        frame = asset.frame_index,
                        strategy = ?strategy,
                        "strategy failed: {e:#}"
                    );
                }
            }
        }

        error!(
            url = asset.url,
            frame = asset.frame_index,
            "all eligible strategies failed"
        );
        DownloadOutcome {
            asset: asset.clone(),
            strategy: None,
            success: false,
            saved_path: None,
        }
    }

    /// Strategy 1: dereference the blob in its owning frame, base64 the
    /// bytes across the execution boundary, decode, persist.
    async fn inline_extract(
        &self,
        frame: &dyn FrameContext,
        asset: &RetainedAsset,
        derived: &str,
        index: usize,
    ) -> Result<PathBuf> {
        let value = frame.evaluate(&inline_fetch_script(&asset.url)).await?;
        let payload = value
            .as_str()
            .context("inline extraction did not return a string payload")?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .context("inline payload was not valid base64")?;
        if bytes.is_empty() {
            bail!("inline extraction produced an empty payload");
        }
        let dest = self.dest_path(derived, index);
        tokio::fs::write(&dest, &bytes)
            .await
            .with_context(|| format!("failed to write {}", dest.display()))?;
        Ok(dest)
    }

    /// Strategy 2: synthesize an anchor click in the owning frame and wait
    /// for the browser's download, keeping the engine-suggested name.
    async fn triggered(
        &self,
        frame: &dyn FrameContext,
        page: &dyn PageContext,
        asset: &RetainedAsset,
        derived: &str,
        index: usize,
    ) -> Result<PathBuf> {
        // Snapshot staging before the click so a stale file (a previous
        // asset's late arrival, for instance) is never claimed as this one.
        let seen = page.staged_files().await.unwrap_or_default();
        frame
            .evaluate(&trigger_click_script(&asset.url, derived))
            .await?;
        let staged = page.wait_for_download(self.dl_timeout_ms, &seen).await?;

        let name = if staged.suggested_name.is_empty() {
            derived.to_string()
        } else {
            sanitize_name(&staged.suggested_name)
        };
        let dest = self.dest_path(&name, index);
        move_file(&staged.path, &dest).await?;
        Ok(dest)
    }

    /// Strategy 3: direct request with the session's cookies. Never used
    /// for blob handles, which cannot be fetched out-of-band.
    async fn fetch(&self, asset: &RetainedAsset, derived: &str, index: usize) -> Result<PathBuf> {
        let timeout = Duration::from_millis(self.dl_timeout_ms);
        let mut req = self.http.get(&asset.url).timeout(timeout);
        if let Some(h) = &self.cookie_header {
            req = req.header(reqwest::header::COOKIE, h.as_str());
        }
        let resp = req.send().await.context("direct fetch failed")?;
        if !resp.status().is_success() {
            bail!("direct fetch returned HTTP {}", resp.status());
        }
        let body = resp.bytes().await.context("failed to read fetch body")?;
        let dest = self.dest_path(derived, index);
        tokio::fs::write(&dest, &body)
            .await
            .with_context(|| format!("failed to write {}", dest.display()))?;
        Ok(dest)
    }

    /// Output path for a sanitized name, disambiguated with the asset's
    /// position if a previous asset already claimed it.
    fn dest_path(&self, name: &str, index: usize) -> PathBuf {
        let direct = self.out_dir.join(name);
        if !direct.exists() {
            return direct;
        }
        self.out_dir.join(format!("{}_{}", index + 1, name))
    }
}

/// JS snippet reading a blob's full content inside its owning frame,
/// encoded as base64 for transfer across the execution boundary.
pub fn inline_fetch_script(url: &str) -> String {
    format!(
        r#"fetch('{}').then(r => r.blob()).then(b => new Promise((resolve, reject) => {{
            const reader = new FileReader();
            reader.onload = () => resolve(String(reader.result).split(',')[1] || '');
            reader.onerror = () => reject(reader.error);
            reader.readAsDataURL(b);
        }}))"#,
        js_string(url)
    )
}

/// JS snippet synthesizing a client-initiated download for a URL.
pub fn trigger_click_script(url: &str, download_name: &str) -> String {
    format!(
        r#"(() => {{
            const a = document.createElement('a');
            a.href = '{}';
            a.download = '{}';
            document.body.appendChild(a);
            a.click();
            a.remove();
            return true;
        }})()"#,
        js_string(url),
        js_string(download_name)
    )
}

/// Move a staged file into the output directory. Falls back to
/// copy-and-remove when rename crosses filesystems.
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to)
        .await
        .with_context(|| format!("failed to move {} to {}", from.display(), to.display()))?;
    let _ = tokio::fs::remove_file(from).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ResourceClass;
    use crate::testing::{FakeFrame, FakePage};

    fn blob_asset(url: &str, frame: usize, size: u64) -> RetainedAsset {
        RetainedAsset {
            url: url.to_string(),
            frame_index: frame,
            size,
        }
    }

    #[test]
    fn test_trigger_click_script_escapes() {
        let js = trigger_click_script("https://h/a'b.wav", "a'b.wav");
        assert!(js.contains("https://h/a\\'b.wav"));
        assert!(js.contains("a.download = 'a\\'b.wav'"));
    }

    #[tokio::test]
    async fn test_inline_extraction_roundtrips_bytes() {
        let out = tempfile::tempdir().unwrap();
        let content: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let frame = FakeFrame::new(0).with_blob_payload("blob:https://h/rec", content.clone());
        let page = FakePage::with_frames(vec![frame]);

        let orch = Orchestrator::new(reqwest::Client::new(), out.path(), 1_000, 0);
        let asset = blob_asset("blob:https://h/rec", 0, content.len() as u64);
        let outcomes = orch.run(&page, &[asset]).await;

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].success);
        assert_eq!(outcomes[0].strategy, Some(Strategy::InlineExtraction));
        let saved = outcomes[0].saved_path.as_ref().unwrap();
        assert_eq!(std::fs::read(saved).unwrap(), content);
    }

    #[tokio::test]
    async fn test_triggered_download_keeps_suggested_name() {
        let out = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let staged = staging.path().join("call_0007.wav");
        std::fs::write(&staged, b"RIFFdata").unwrap();

        let frame = FakeFrame::new(0);
        let page = FakePage::with_frames(vec![frame.clone()]);
        page.stage_download(staged);

        let orch = Orchestrator::new(reqwest::Client::new(), out.path(), 1_000, 0);
        let asset = RetainedAsset {
            url: "https://h/media/recording?id=7".to_string(),
            frame_index: 0,
            size: 8,
        };
        let outcomes = orch.run(&page, &[asset]).await;

        assert!(outcomes[0].success);
        assert_eq!(outcomes[0].strategy, Some(Strategy::TriggeredDownload));
        let saved = outcomes[0].saved_path.as_ref().unwrap();
        assert_eq!(saved.file_name().unwrap(), "call_0007.wav");
        assert_eq!(std::fs::read(saved).unwrap(), b"RIFFdata");
        assert_eq!(frame.clicked_urls().len(), 1);
    }

    #[tokio::test]
    async fn test_blob_never_falls_through_to_fetch() {
        // Inline fails (no payload), triggered fails (nothing staged):
        // the chain must exhaust without ever issuing a network request.
        let out = tempfile::tempdir().unwrap();
        let frame = FakeFrame::new(0);
        let page = FakePage::with_frames(vec![frame]);

        let orch = Orchestrator::new(reqwest::Client::new(), out.path(), 10, 0);
        let asset = blob_asset("blob:https://h/gone", 0, 1024);
        let outcomes = orch.run(&page, &[asset]).await;

        assert!(!outcomes[0].success);
        assert_eq!(outcomes[0].strategy, None);
        assert!(outcomes[0].saved_path.is_none());
        assert_eq!(ResourceClass::of(&outcomes[0].asset.url), ResourceClass::Ephemeral);
    }

    #[tokio::test]
    async fn test_one_failed_asset_does_not_abort_batch() {
        let out = tempfile::tempdir().unwrap();
        let content = vec![7u8; 2048];
        let frame = FakeFrame::new(0).with_blob_payload("blob:https://h/good", content.clone());
        let page = FakePage::with_frames(vec![frame]);

        let orch = Orchestrator::new(reqwest::Client::new(), out.path(), 10, 0);
        let assets = vec![
            blob_asset("blob:https://h/bad", 0, 1024),
            blob_asset("blob:https://h/good", 0, content.len() as u64),
        ];
        let outcomes = orch.run(&page, &assets).await;

        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[0].success);
        assert!(outcomes[1].success);
    }

    #[tokio::test]
    async fn test_stale_staged_file_is_not_claimed_as_the_new_download() {
        // A completed file left in staging from before the click (e.g. a
        // previous asset's late arrival) must not satisfy this asset's
        // triggered download.
        let out = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let stale = staging.path().join("earlier_call.wav");
        std::fs::write(&stale, b"RIFFold").unwrap();

        let frame = FakeFrame::new(0);
        let page = FakePage::with_frames(vec![frame.clone()]);
        page.stage_preexisting(stale.clone());

        let orch = Orchestrator::new(reqwest::Client::new(), out.path(), 10, 0);
        let asset = blob_asset("blob:https://h/current", 0, 1024);
        let outcomes = orch.run(&page, &[asset]).await;

        // Inline fails (no payload) and the triggered strategy must not
        // pick up the stale file, so the chain exhausts.
        assert!(!outcomes[0].success);
        assert!(outcomes[0].saved_path.is_none());
        assert!(stale.exists(), "stale staging file was consumed");
        assert_eq!(frame.clicked_urls().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_frame_exhausts_frame_bound_strategies() {
        let out = tempfile::tempdir().unwrap();
        // Asset claims frame 5; the page only has frame 0.
        let page = FakePage::with_frames(vec![FakeFrame::new(0)]);
        let orch = Orchestrator::new(reqwest::Client::new(), out.path(), 10, 0);
        let asset = blob_asset("blob:https://h/x", 5, 1024);
        let outcomes = orch.run(&page, &[asset]).await;
        assert!(!outcomes[0].success);
    }
}
