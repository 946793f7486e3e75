//! Test doubles for the renderer traits.
//!
//! `FakeFrame` answers the pipeline's generated JS snippets from canned
//! data (candidate URLs, blob sizes, blob payloads) and records synthetic
//! download clicks. `FakePage` serves scripted frame snapshots per
//! enumeration pass and staged download files. Used by unit tests and the
//! `tests/` scenarios; no browser involved.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};

use crate::renderer::{DownloadedFile, FrameContext, PageContext};
use crate::session::SessionCookie;

/// A canned frame.
#[derive(Clone, Default)]
pub struct FakeFrame {
    index: usize,
    urls: Vec<String>,
    blob_sizes: HashMap<String, u64>,
    blob_payloads: HashMap<String, Vec<u8>>,
    fail_scan: bool,
    clicks: Arc<Mutex<Vec<String>>>,
}

impl FakeFrame {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    /// URLs the scan script will report, in order.
    pub fn with_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.urls = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Size reported for a blob URL measured inside this frame.
    pub fn with_blob_size(mut self, url: &str, size: u64) -> Self {
        self.blob_sizes.insert(url.to_string(), size);
        self
    }

    /// Full content served for inline extraction of a blob URL. Also makes
    /// the size probe report the payload's length.
    pub fn with_blob_payload(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.blob_sizes.insert(url.to_string(), bytes.len() as u64);
        self.blob_payloads.insert(url.to_string(), bytes);
        self
    }

    /// Simulate a torn-down frame: every scan errors.
    pub fn with_scan_failure(mut self) -> Self {
        self.fail_scan = true;
        self
    }

    /// Scripts recorded for synthesized download clicks.
    pub fn clicked_urls(&self) -> Vec<String> {
        self.clicks.lock().expect("clicks lock").clone()
    }
}

#[async_trait]
impl FrameContext for FakeFrame {
    fn index(&self) -> usize {
        self.index
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        // Inline extraction: fetch + FileReader → base64 payload.
        if script.contains("readAsDataURL") {
            for (url, bytes) in &self.blob_payloads {
                if script.contains(url.as_str()) {
                    let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
                    return Ok(json!(b64));
                }
            }
            bail!("Failed to fetch");
        }
        // Size probe: fetch(url).blob().size.
        if script.contains("b.size") {
            for (url, size) in &self.blob_sizes {
                if script.contains(url.as_str()) {
                    return Ok(json!(size));
                }
            }
            bail!("Failed to fetch");
        }
        // Synthesized download click.
        if script.contains("createElement('a')") {
            self.clicks.lock().expect("clicks lock").push(script.to_string());
            return Ok(json!(true));
        }
        // The discovery scan.
        if script.contains("audio,source") {
            if self.fail_scan {
                bail!("Execution context was destroyed");
            }
            return Ok(json!(self.urls));
        }
        Ok(Value::Null)
    }
}

/// A canned page serving scripted frame snapshots.
#[derive(Default)]
pub struct FakePage {
    passes: Vec<Vec<FakeFrame>>,
    pass_counter: AtomicUsize,
    nav_counter: AtomicUsize,
    fail_navigation: bool,
    scripts: Mutex<Vec<String>>,
    staged: Mutex<Vec<DownloadedFile>>,
    preexisting: Mutex<Vec<PathBuf>>,
    url: String,
}

impl FakePage {
    /// Every enumeration returns the same frames.
    pub fn with_frames(frames: Vec<FakeFrame>) -> Self {
        Self::with_frame_passes(vec![frames])
    }

    /// Successive enumerations return successive entries; the last entry
    /// repeats once exhausted.
    pub fn with_frame_passes(passes: Vec<Vec<FakeFrame>>) -> Self {
        Self {
            passes,
            url: "https://app.example.com/reports".to_string(),
            ..Self::default()
        }
    }

    /// Simulate an unreachable target: every navigation errors.
    pub fn with_navigation_failure(mut self) -> Self {
        self.fail_navigation = true;
        self
    }

    /// Stage a file that arrives after the next download trigger.
    pub fn stage_download(&self, path: PathBuf) {
        let suggested_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.staged.lock().expect("staged lock").push(DownloadedFile {
            path,
            suggested_name,
        });
    }

    /// Stage a file that was already present before any trigger, so it
    /// shows up in the pre-trigger snapshot.
    pub fn stage_preexisting(&self, path: PathBuf) {
        self.preexisting
            .lock()
            .expect("preexisting lock")
            .push(path.clone());
        self.stage_download(path);
    }

    /// How many times `frames()` has been called.
    pub fn frame_passes(&self) -> usize {
        self.pass_counter.load(Ordering::SeqCst)
    }

    /// How many times `navigate()` has been called.
    pub fn navigation_attempts(&self) -> usize {
        self.nav_counter.load(Ordering::SeqCst)
    }

    /// Scripts evaluated at page level (e.g. hydration scrolls).
    pub fn evaluated_scripts(&self) -> Vec<String> {
        self.scripts.lock().expect("scripts lock").clone()
    }
}

#[async_trait]
impl PageContext for FakePage {
    async fn navigate(&self, url: &str, _timeout_ms: u64) -> Result<()> {
        self.nav_counter.fetch_add(1, Ordering::SeqCst);
        if self.fail_navigation {
            bail!("navigation to {url} failed: net::ERR_CONNECTION_REFUSED");
        }
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        self.scripts.lock().expect("scripts lock").push(script.to_string());
        Ok(Value::Null)
    }

    async fn frames(&self) -> Result<Vec<Box<dyn FrameContext>>> {
        let pass = self.pass_counter.fetch_add(1, Ordering::SeqCst);
        let idx = pass.min(self.passes.len().saturating_sub(1));
        Ok(self
            .passes
            .get(idx)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|f| Box::new(f) as Box<dyn FrameContext>)
            .collect())
    }

    async fn wait_for_selector(&self, _selector: &str, _timeout_ms: u64) -> Result<bool> {
        Ok(true)
    }

    async fn staged_files(&self) -> Result<Vec<PathBuf>> {
        Ok(self.preexisting.lock().expect("preexisting lock").clone())
    }

    async fn wait_for_download(
        &self,
        timeout_ms: u64,
        seen: &[PathBuf],
    ) -> Result<DownloadedFile> {
        let mut staged = self.staged.lock().expect("staged lock");
        match staged.iter().position(|f| !seen.contains(&f.path)) {
            Some(i) => Ok(staged.remove(i)),
            None => bail!("no download completed within {timeout_ms}ms"),
        }
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        std::fs::write(path, b"")?;
        Ok(())
    }

    async fn content(&self) -> Result<String> {
        Ok("<html><body></body></html>".to_string())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.url.clone())
    }

    async fn set_cookies(&self, _cookies: Vec<SessionCookie>) -> Result<()> {
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<SessionCookie>> {
        Ok(Vec::new())
    }
}
