//! Chromium-based page context using chromiumoxide.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::cdp::browser_protocol::page::{
    CreateIsolatedWorldParams, FrameTree, GetFrameTreeParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;

use super::{js_string, DownloadedFile, FrameContext, PageContext};
use crate::session::SessionCookie;

/// Poll interval for selector waits and download watching.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Find the Chromium binary path.
///
/// Order: explicit override (config / `HARVEST_CHROMIUM_PATH`), system
/// `PATH`, then common macOS locations.
pub fn find_chromium(overridden: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = overridden {
        if p.exists() {
            return Some(p.to_path_buf());
        }
    }

    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// A launched Chromium instance owning the download staging directory.
pub struct ChromiumBrowser {
    browser: Browser,
    staging_dir: PathBuf,
}

impl ChromiumBrowser {
    /// Launch Chromium and route client-initiated downloads into
    /// `staging_dir`.
    pub async fn launch(
        headless: bool,
        chromium_path: Option<&Path>,
        staging_dir: &Path,
    ) -> Result<Self> {
        let chrome_path = find_chromium(chromium_path)
            .context("Chromium not found. Set HARVEST_CHROMIUM_PATH or install google-chrome")?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking");
        if headless {
            builder = builder.arg("--headless=new");
        } else {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|e| anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        // Drive the CDP message loop for the life of the browser.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        browser
            .execute(
                SetDownloadBehaviorParams::builder()
                    .behavior(SetDownloadBehaviorBehavior::Allow)
                    .download_path(staging_dir.to_string_lossy().to_string())
                    .events_enabled(true)
                    .build()
                    .map_err(|e| anyhow!("failed to build download behavior params: {e}"))?,
            )
            .await
            .context("failed to set download behavior")?;

        Ok(Self {
            browser,
            staging_dir: staging_dir.to_path_buf(),
        })
    }

    /// Open a blank page in the default browsing context.
    pub async fn new_page(&self) -> Result<ChromiumPage> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;
        Ok(ChromiumPage {
            page,
            staging_dir: self.staging_dir.clone(),
        })
    }

    /// Close the browser process.
    pub async fn shutdown(mut self) -> Result<()> {
        let _ = self.browser.close().await;
        let _ = self.browser.wait().await;
        Ok(())
    }
}

/// A single Chromium page.
pub struct ChromiumPage {
    page: Page,
    staging_dir: PathBuf,
}

#[async_trait]
impl PageContext for ChromiumPage {
    async fn navigate(&self, url: &str, timeout_ms: u64) -> Result<()> {
        let result = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.page.goto(url.to_string()),
        )
        .await;

        match result {
            Ok(Ok(_)) => {
                // Best-effort settle; navigation already committed.
                let _ = tokio::time::timeout(
                    Duration::from_millis(timeout_ms),
                    self.page.wait_for_navigation(),
                )
                .await;
                Ok(())
            }
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => bail!("navigation timed out after {timeout_ms}ms"),
        }
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .context("JS execution failed")?;
        // Undefined results (e.g. a bare scroll) come back as null.
        Ok(result
            .into_value()
            .unwrap_or(serde_json::Value::Null))
    }

    async fn frames(&self) -> Result<Vec<Box<dyn FrameContext>>> {
        let resp = self
            .page
            .execute(GetFrameTreeParams::default())
            .await
            .context("failed to read frame tree")?;

        let mut ids = Vec::new();
        walk_frame_tree(&resp.result.frame_tree, &mut ids);

        Ok(ids
            .into_iter()
            .enumerate()
            .map(|(index, frame_id)| {
                Box::new(ChromiumFrame {
                    page: self.page.clone(),
                    frame_id,
                    index,
                }) as Box<dyn FrameContext>
            })
            .collect())
    }

    async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<bool> {
        let probe = format!("!!document.querySelector('{}')", js_string(selector));
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if let Ok(v) = self.evaluate(&probe).await {
                if v.as_bool().unwrap_or(false) {
                    return Ok(true);
                }
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn staged_files(&self) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&self.staging_dir) {
            for entry in entries.flatten() {
                if entry.path().is_file() {
                    out.push(entry.path());
                }
            }
        }
        Ok(out)
    }

    async fn wait_for_download(
        &self,
        timeout_ms: u64,
        seen: &[PathBuf],
    ) -> Result<DownloadedFile> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        // A candidate whose size holds across two poll rounds stands in
        // for a completion event.
        let mut last_sizes: HashMap<PathBuf, u64> = HashMap::new();
        loop {
            for (path, size) in staged_candidates(&self.staging_dir, seen) {
                if last_sizes.get(&path) == Some(&size) {
                    let suggested_name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    return Ok(DownloadedFile {
                        path,
                        suggested_name,
                    });
                }
                last_sizes.insert(path, size);
            }
            if Instant::now() >= deadline {
                bail!("no download completed within {timeout_ms}ms");
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        self.page
            .save_screenshot(
                ScreenshotParams::builder().full_page(true).build(),
                path,
            )
            .await
            .context("screenshot failed")?;
        Ok(())
    }

    async fn content(&self) -> Result<String> {
        self.page.content().await.context("failed to get HTML")
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self
            .page
            .url()
            .await
            .context("failed to get URL")?
            .map(|u| u.to_string())
            .unwrap_or_default())
    }

    async fn set_cookies(&self, cookies: Vec<SessionCookie>) -> Result<()> {
        let mut params = Vec::with_capacity(cookies.len());
        for c in cookies {
            // Expiry is not carried over; for a single run, session-scoped
            // cookies behave identically.
            let mut builder = CookieParam::builder().name(c.name).value(c.value);
            if !c.domain.is_empty() {
                builder = builder.domain(c.domain);
            }
            if !c.path.is_empty() {
                builder = builder.path(c.path);
            }
            let param = builder
                .secure(c.secure)
                .http_only(c.http_only)
                .build()
                .map_err(|e| anyhow!("invalid cookie: {e}"))?;
            params.push(param);
        }
        self.page
            .set_cookies(params)
            .await
            .context("failed to set cookies")?;
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<SessionCookie>> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .context("failed to read cookies")?;
        Ok(cookies
            .into_iter()
            .map(|c| SessionCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                http_only: c.http_only,
                secure: c.secure,
            })
            .collect())
    }
}

/// Collect frame ids depth-first, main frame first. The tree order is the
/// browser's discovery order at snapshot time.
fn walk_frame_tree(node: &FrameTree, out: &mut Vec<chromiumoxide::cdp::browser_protocol::page::FrameId>) {
    out.push(node.frame.id.clone());
    if let Some(children) = &node.child_frames {
        for child in children {
            walk_frame_tree(child, out);
        }
    }
}

/// Non-partial files in the staging directory that are not in `seen`,
/// with their current sizes. Chrome writes `.crdownload` files while a
/// transfer is in flight and renames on completion.
fn staged_candidates(dir: &Path, seen: &[PathBuf]) -> Vec<(PathBuf, u64)> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return Vec::new(),
    };
    let mut out = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() || seen.contains(&path) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.')
            || name.ends_with(".crdownload")
            || name.ends_with(".tmp")
            || name.ends_with(".partial")
        {
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        out.push((path, size));
    }
    out
}

/// One frame of a Chromium page. Evaluation runs in an isolated world
/// created inside the frame, so `blob:` handles minted by that frame
/// resolve correctly.
pub struct ChromiumFrame {
    page: Page,
    frame_id: chromiumoxide::cdp::browser_protocol::page::FrameId,
    index: usize,
}

#[async_trait]
impl FrameContext for ChromiumFrame {
    fn index(&self) -> usize {
        self.index
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let world = self
            .page
            .execute(
                CreateIsolatedWorldParams::builder()
                    .frame_id(self.frame_id.clone())
                    .world_name("__audioharvest")
                    // Method name carries the upstream protocol typo.
                    .grant_univeral_access(true)
                    .build()
                    .map_err(|e| anyhow!("failed to build isolated world params: {e}"))?,
            )
            .await
            .context("frame execution context unavailable")?;

        let eval = self
            .page
            .execute(
                EvaluateParams::builder()
                    .expression(script)
                    .context_id(world.result.execution_context_id.clone())
                    .await_promise(true)
                    .return_by_value(true)
                    .build()
                    .map_err(|e| anyhow!("failed to build evaluate params: {e}"))?,
            )
            .await
            .context("frame evaluation failed")?;

        if let Some(exc) = &eval.result.exception_details {
            bail!("frame evaluation threw: {}", exc.text);
        }
        Ok(eval
            .result
            .result
            .value
            .clone()
            .unwrap_or(serde_json::Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staged_candidates_skips_partials() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.crdownload"), b"half").unwrap();
        std::fs::write(dir.path().join(".hidden"), b"x").unwrap();
        assert!(staged_candidates(dir.path(), &[]).is_empty());

        std::fs::write(dir.path().join("call_0142.wav"), b"RIFF").unwrap();
        let found = staged_candidates(dir.path(), &[]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0.file_name().unwrap(), "call_0142.wav");
        assert_eq!(found[0].1, 4);
    }

    #[test]
    fn test_staged_candidates_ignores_pre_trigger_snapshot() {
        // A file completed before the trigger must never be reported as
        // the new download, even though it looks complete.
        let dir = tempfile::tempdir().expect("tempdir");
        let stale = dir.path().join("earlier_call.wav");
        std::fs::write(&stale, b"RIFFold").unwrap();
        let seen = vec![stale];
        assert!(staged_candidates(dir.path(), &seen).is_empty());

        std::fs::write(dir.path().join("fresh_call.wav"), b"RIFFnew").unwrap();
        let found = staged_candidates(dir.path(), &seen);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0.file_name().unwrap(), "fresh_call.wav");
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_frames_and_evaluate() {
        let staging = tempfile::tempdir().expect("tempdir");
        let browser = ChromiumBrowser::launch(true, None, staging.path())
            .await
            .expect("launch failed");
        let page = browser.new_page().await.expect("page failed");

        page.navigate("data:text/html,<h1>Hello</h1>", 10_000)
            .await
            .expect("navigation failed");

        let frames = page.frames().await.expect("frames failed");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].index(), 0);

        let text = frames[0]
            .evaluate("document.querySelector('h1').textContent")
            .await
            .expect("evaluate failed");
        assert_eq!(text.as_str().unwrap(), "Hello");

        browser.shutdown().await.expect("shutdown failed");
    }
}
