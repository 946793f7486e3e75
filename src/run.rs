// Copyright 2026 Audioharvest Contributors
// SPDX-License-Identifier: Apache-2.0

//! Top-level run orchestration.
//!
//! Sequencing: prepare the run directory, launch the browser, install any
//! pre-authenticated session, navigate with bounded retry, best-effort
//! login, readiness wait, discovery with retry, downloads, evidence,
//! summary. Only startup-level failures escape as errors; every per-asset
//! problem is logged and absorbed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::anyhow;
use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use crate::config::{Config, Readiness};
use crate::error::FatalError;
use crate::evidence;
use crate::pipeline::download::Orchestrator;
use crate::pipeline::probe::SizeResolver;
use crate::pipeline::retry::collect_with_retry;
use crate::renderer::chromium::ChromiumBrowser;
use crate::renderer::PageContext;
use crate::session;

/// Fixed navigation retry policy: attempts and backoff between them.
const NAV_ATTEMPTS: u32 = 3;
const NAV_BACKOFF: Duration = Duration::from_secs(2);

/// Timeout for size probes; probes are header-only and should be quick.
const PROBE_TIMEOUT_MS: u64 = 15_000;

/// What a run produced.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub out_dir: PathBuf,
    pub retained: usize,
    pub downloaded: usize,
    pub failed: usize,
}

/// Process-wide state for one run: the output directory (created once,
/// timestamped, never reused), the resolved configuration, and the
/// download staging area.
pub struct RunContext {
    pub cfg: Config,
    pub out_dir: PathBuf,
    pub staging_dir: PathBuf,
}

impl RunContext {
    /// Create the run's output directory under the configured root.
    pub fn prepare(cfg: Config) -> Result<Self, FatalError> {
        let stamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S%.3fZ");
        let out_dir = cfg.output_root.join(stamp.to_string());
        let staging_dir = out_dir.join(".staging");
        std::fs::create_dir_all(&staging_dir).map_err(|source| FatalError::OutputDir {
            path: out_dir.clone(),
            source,
        })?;
        Ok(Self {
            cfg,
            out_dir,
            staging_dir,
        })
    }
}

/// Execute one full harvest run.
pub async fn execute(cfg: Config) -> Result<RunSummary, FatalError> {
    let ctx = RunContext::prepare(cfg)?;
    info!(out_dir = %ctx.out_dir.display(), "run directory created");

    let browser = ChromiumBrowser::launch(
        ctx.cfg.headless,
        ctx.cfg.chromium_path.as_deref(),
        &ctx.staging_dir,
    )
    .await
    .map_err(FatalError::Startup)?;
    let page = browser.new_page().await.map_err(FatalError::Startup)?;

    let result = harvest(&page, &ctx).await;

    if let Err(e) = browser.shutdown().await {
        warn!("browser shutdown failed: {e:#}");
    }
    result
}

async fn harvest(page: &dyn PageContext, ctx: &RunContext) -> Result<RunSummary, FatalError> {
    let cfg = &ctx.cfg;

    // Pre-authenticated session, when provided. Soft: a bad blob falls
    // back to form login.
    if !cfg.storage_state_b64.is_empty() {
        match session::decode_storage_state(&cfg.storage_state_b64) {
            Ok(state) => {
                info!(cookies = state.cookies.len(), "installing storage state");
                if let Err(e) = page.set_cookies(state.cookies).await {
                    warn!("failed to install storage state: {e:#}");
                }
            }
            Err(e) => warn!("storage state blob unusable: {e:#}"),
        }
    }

    navigate_with_retry(page, &cfg.target_url, cfg.nav_timeout_ms).await?;

    if let Err(e) = session::login_if_needed(page, cfg).await {
        warn!("login flow failed: {e:#}");
    }

    // Login may have parked us on a dashboard; make sure we are on target.
    navigate_with_retry(page, &cfg.target_url, cfg.nav_timeout_ms).await?;

    ensure_ready(page, cfg).await;

    if let Err(e) = evidence::screenshot(page, &ctx.out_dir, "1_loaded").await {
        warn!("pre-discovery screenshot failed: {e:#}");
    }

    // Probes and direct fetches carry the session's current cookies.
    let http = http_client();
    let cookie_header = current_cookie_header(page, &cfg.target_url).await;
    let resolver = SizeResolver::new(http.clone(), PROBE_TIMEOUT_MS, cfg.probe_pause_ms)
        .with_cookie_header(cookie_header.clone());

    let assets = collect_with_retry(page, &resolver, cfg).await;
    info!(
        retained = assets.len(),
        threshold_bytes = cfg.min_bytes,
        "discovery complete"
    );

    let orchestrator = Orchestrator::new(
        http,
        &ctx.out_dir,
        cfg.dl_timeout_ms,
        cfg.pause_between_ms,
    )
    .with_cookie_header(cookie_header)
    .with_base_url(Some(cfg.target_url.clone()));
    let outcomes = orchestrator.run(page, &assets).await;

    if let Err(e) = evidence::screenshot(page, &ctx.out_dir, "2_done").await {
        warn!("post-download screenshot failed: {e:#}");
    }
    if let Err(e) = evidence::snapshot_html(page, &ctx.out_dir).await {
        warn!("page snapshot failed: {e:#}");
    }

    // Best-effort cleanup of the (normally empty) staging area.
    let _ = std::fs::remove_dir_all(&ctx.staging_dir);

    let downloaded = outcomes.iter().filter(|o| o.success).count();
    let failed = outcomes.len() - downloaded;
    info!(downloaded, failed, "run complete");

    let summary = RunSummary {
        out_dir: ctx.out_dir.clone(),
        retained: assets.len(),
        downloaded,
        failed,
    };
    if let Err(e) = write_summary(&ctx.out_dir, &summary) {
        warn!("could not write run summary: {e:#}");
    }
    Ok(summary)
}

/// Persist the machine-readable run record as `summary.json` next to the
/// evidence artifacts.
fn write_summary(dir: &Path, summary: &RunSummary) -> anyhow::Result<PathBuf> {
    let path = dir.join("summary.json");
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(&path, json)?;
    Ok(path)
}

/// Bounded navigation retry: fixed attempt count, fixed backoff.
/// Exhaustion is fatal to the run.
async fn navigate_with_retry(
    page: &dyn PageContext,
    url: &str,
    timeout_ms: u64,
) -> Result<(), FatalError> {
    let mut last_err = anyhow!("no attempts made");
    for attempt in 1..=NAV_ATTEMPTS {
        match page.navigate(url, timeout_ms).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(attempt, url, "navigation attempt failed: {e:#}");
                last_err = e;
                if attempt < NAV_ATTEMPTS {
                    tokio::time::sleep(NAV_BACKOFF).await;
                }
            }
        }
    }
    Err(FatalError::Navigation {
        url: url.to_string(),
        attempts: NAV_ATTEMPTS,
        source: last_err,
    })
}

/// Wait for the configured readiness condition, then settle and run any
/// configured scroll rounds. Not being ready is a soft warning; the page
/// may still expose assets.
async fn ensure_ready(page: &dyn PageContext, cfg: &Config) {
    match &cfg.readiness {
        Readiness::Load => {
            wait_ready_state(page, "complete", cfg.nav_timeout_ms).await;
        }
        Readiness::DomContentLoaded => {
            wait_ready_state(page, "interactive", cfg.nav_timeout_ms).await;
        }
        Readiness::Selector(sel) => {
            match page.wait_for_selector(sel, cfg.nav_timeout_ms).await {
                Ok(true) => {}
                Ok(false) => warn!(selector = sel, "readiness selector never appeared"),
                Err(e) => warn!(selector = sel, "readiness wait failed: {e:#}"),
            }
        }
    }

    if cfg.settle_ms > 0 {
        tokio::time::sleep(Duration::from_millis(cfg.settle_ms)).await;
    }

    for _ in 0..cfg.scroll_rounds {
        if page
            .evaluate("window.scrollTo(0, document.body.scrollHeight)")
            .await
            .is_err()
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(cfg.settle_ms.max(250))).await;
    }
}

/// Poll `document.readyState` until it reaches (or passes) the wanted
/// state or the timeout elapses.
async fn wait_ready_state(page: &dyn PageContext, wanted: &str, timeout_ms: u64) {
    let deadline = std::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if let Ok(v) = page.evaluate("document.readyState").await {
            let state = v.as_str().unwrap_or("");
            if state == "complete" || state == wanted {
                return;
            }
        }
        if std::time::Instant::now() >= deadline {
            warn!(wanted, "page never reached ready state");
            return;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(5))
        .user_agent(concat!("audioharvest/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}

/// Build the `Cookie` header for out-of-band requests from the context's
/// current cookies.
async fn current_cookie_header(page: &dyn PageContext, target_url: &str) -> Option<String> {
    let url = Url::parse(target_url).ok()?;
    match page.cookies().await {
        Ok(cookies) => session::cookie_header(&cookies, &url),
        Err(e) => {
            warn!("could not read session cookies: {e:#}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePage;

    #[test]
    fn test_run_directories_are_unique_per_run() {
        let root = tempfile::tempdir().unwrap();
        let cfg = Config {
            output_root: root.path().to_path_buf(),
            ..Config::default()
        };
        let a = RunContext::prepare(cfg.clone()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = RunContext::prepare(cfg).unwrap();
        assert_ne!(a.out_dir, b.out_dir);
        assert!(a.staging_dir.starts_with(&a.out_dir));
        assert!(a.staging_dir.exists());
    }

    #[tokio::test]
    async fn test_navigation_succeeds_without_retries() {
        let page = FakePage::with_frames(vec![]);
        navigate_with_retry(&page, "https://h/", 100).await.unwrap();
        assert_eq!(page.navigation_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_exhaustion_is_fatal_after_bounded_attempts() {
        let page = FakePage::with_frames(vec![]).with_navigation_failure();
        let err = navigate_with_retry(&page, "https://unreachable/", 100)
            .await
            .unwrap_err();
        match err {
            FatalError::Navigation { url, attempts, .. } => {
                assert_eq!(url, "https://unreachable/");
                assert_eq!(attempts, NAV_ATTEMPTS);
            }
            other => panic!("expected a navigation failure, got: {other}"),
        }
        assert_eq!(page.navigation_attempts(), NAV_ATTEMPTS as usize);
    }

    #[test]
    fn test_summary_serializes_for_the_run_record() {
        let dir = tempfile::tempdir().unwrap();
        let summary = RunSummary {
            out_dir: dir.path().to_path_buf(),
            retained: 3,
            downloaded: 2,
            failed: 1,
        };
        let path = write_summary(dir.path(), &summary).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["retained"], 3);
        assert_eq!(json["downloaded"], 2);
        assert_eq!(json["failed"], 1);
    }
}
