//! Non-destructive size resolution for candidate URLs.
//!
//! Ephemeral `blob:` handles are measured inside their owning frame (they
//! are meaningless anywhere else). Network URLs get a header-only HEAD
//! probe carrying the session's cookies, falling back to a one-byte ranged
//! request when the server omits Content-Length.
//!
//! Any probe failure resolves to 0, indistinguishable from a genuinely
//! empty resource, and excluded by the threshold filter either way.

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use regex::Regex;
use tracing::{debug, warn};

use crate::pipeline::ResourceClass;
use crate::renderer::{js_string, FrameContext};

/// Resolves candidate sizes without materializing network resources.
pub struct SizeResolver {
    http: reqwest::Client,
    cookie_header: Option<String>,
    probe_timeout_ms: u64,
    probe_pause_ms: u64,
}

impl SizeResolver {
    pub fn new(http: reqwest::Client, probe_timeout_ms: u64, probe_pause_ms: u64) -> Self {
        Self {
            http,
            cookie_header: None,
            probe_timeout_ms,
            probe_pause_ms,
        }
    }

    /// Attach the session's `Cookie` header to every network probe.
    pub fn with_cookie_header(mut self, header: Option<String>) -> Self {
        self.cookie_header = header;
        self
    }

    /// Resolve the byte size of one candidate. Never errors: probe
    /// failures resolve to 0 (unresolved/excluded).
    pub async fn resolve(&self, frame: &dyn FrameContext, url: &str) -> u64 {
        let result = match ResourceClass::of(url) {
            ResourceClass::Ephemeral => self.blob_size(frame, url).await,
            ResourceClass::Network => self.network_size(url).await,
        };
        match result {
            Ok(size) => {
                debug!(frame = frame.index(), url, size, "probe resolved");
                size
            }
            Err(e) => {
                warn!(frame = frame.index(), url, "probe failed: {e:#}");
                0
            }
        }
    }

    /// Pause between successive probes within a frame, to avoid hammering
    /// the origin.
    pub async fn pause(&self) {
        if self.probe_pause_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.probe_pause_ms)).await;
        }
    }

    /// Measure a blob by materializing it in-place inside its owning frame.
    async fn blob_size(&self, frame: &dyn FrameContext, url: &str) -> Result<u64> {
        let value = frame.evaluate(&blob_size_script(url)).await?;
        value
            .as_u64()
            .context("blob size did not come back as a number")
    }

    /// HEAD probe, then a `bytes=0-0` ranged request when the length header
    /// is absent or non-numeric.
    async fn network_size(&self, url: &str) -> Result<u64> {
        let timeout = Duration::from_millis(self.probe_timeout_ms);

        let mut req = self.http.head(url).timeout(timeout);
        if let Some(h) = &self.cookie_header {
            req = req.header(reqwest::header::COOKIE, h.as_str());
        }
        let resp = req.send().await.context("HEAD probe failed")?;
        if resp.status().is_success() {
            if let Some(n) = header_u64(resp.headers(), reqwest::header::CONTENT_LENGTH) {
                if n > 0 {
                    return Ok(n);
                }
            }
        }

        let mut req = self
            .http
            .get(url)
            .header(reqwest::header::RANGE, "bytes=0-0")
            .timeout(timeout);
        if let Some(h) = &self.cookie_header {
            req = req.header(reqwest::header::COOKIE, h.as_str());
        }
        let resp = req.send().await.context("ranged probe failed")?;
        if !resp.status().is_success() {
            bail!("ranged probe returned HTTP {}", resp.status());
        }
        let content_range = resp
            .headers()
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        match parse_content_range_total(content_range) {
            Some(n) => Ok(n),
            None => bail!("no usable size metadata in probe responses"),
        }
    }
}

/// JS snippet measuring a blob's byte length inside the owning frame.
pub fn blob_size_script(url: &str) -> String {
    format!(
        "fetch('{}').then(r => r.blob()).then(b => b.size)",
        js_string(url)
    )
}

fn header_u64(headers: &reqwest::header::HeaderMap, name: reqwest::header::HeaderName) -> Option<u64> {
    headers
        .get(name)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Total size from a `Content-Range` value, e.g. `bytes 0-0/5242880`.
pub fn parse_content_range_total(value: &str) -> Option<u64> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"/(\d+)\s*$").expect("valid regex"));
    re.captures(value)?.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeFrame;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_content_range_total() {
        assert_eq!(parse_content_range_total("bytes 0-0/5242880"), Some(5_242_880));
        assert_eq!(parse_content_range_total("bytes 0-0/123 "), Some(123));
        assert_eq!(parse_content_range_total("bytes */*"), None);
        assert_eq!(parse_content_range_total(""), None);
    }

    #[test]
    fn test_blob_size_script_escapes_url() {
        let js = blob_size_script("blob:https://a/x'y");
        assert!(js.contains("blob:https://a/x\\'y"));
    }

    #[tokio::test]
    async fn test_blob_size_resolved_in_owning_frame() {
        let frame = FakeFrame::new(1).with_blob_size("blob:https://a/x", 2_097_152);
        let resolver = SizeResolver::new(reqwest::Client::new(), 5_000, 0);
        assert_eq!(resolver.resolve(&frame, "blob:https://a/x").await, 2_097_152);
    }

    #[tokio::test]
    async fn test_head_probe_uses_content_length_and_cookies() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/rec.wav"))
            .and(header("cookie", "sid=42"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-length", "2097152"))
            .mount(&server)
            .await;

        let resolver = SizeResolver::new(reqwest::Client::new(), 5_000, 0)
            .with_cookie_header(Some("sid=42".to_string()));
        let frame = FakeFrame::new(0);
        let size = resolver
            .resolve(&frame, &format!("{}/rec.wav", server.uri()))
            .await;
        assert_eq!(size, 2_097_152);
    }

    #[tokio::test]
    async fn test_ranged_fallback_when_length_missing() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/rec.wav"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rec.wav"))
            .and(header("range", "bytes=0-0"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("content-range", "bytes 0-0/5242880")
                    .set_body_bytes(vec![0u8]),
            )
            .mount(&server)
            .await;

        let resolver = SizeResolver::new(reqwest::Client::new(), 5_000, 0);
        let frame = FakeFrame::new(0);
        let size = resolver
            .resolve(&frame, &format!("{}/rec.wav", server.uri()))
            .await;
        assert_eq!(size, 5_242_880);
    }

    #[tokio::test]
    async fn test_probe_failure_resolves_to_zero() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/denied.wav"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/denied.wav"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let resolver = SizeResolver::new(reqwest::Client::new(), 5_000, 0);
        let frame = FakeFrame::new(0);
        let size = resolver
            .resolve(&frame, &format!("{}/denied.wav", server.uri()))
            .await;
        assert_eq!(size, 0);
    }
}
