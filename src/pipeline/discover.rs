//! Per-frame candidate discovery.
//!
//! A bounded, heuristic scan of one frame's rendered content: native
//! audio/media elements with a direct source, plus any element whose
//! recognized attributes point at an audio file or a `blob:` handle. The
//! attribute and extension sets are declarative configuration, not
//! per-target hardcoding.

use anyhow::Result;
use tracing::warn;

use crate::renderer::FrameContext;

/// What the frame scan looks for.
#[derive(Debug, Clone)]
pub struct ScanSpec {
    /// Element attributes checked for candidate URLs.
    pub attributes: Vec<String>,
    /// File extensions recognized as audio (without the dot).
    pub extensions: Vec<String>,
}

impl ScanSpec {
    pub const DEFAULT_ATTRIBUTES: &'static [&'static str] =
        &["href", "src", "data-url", "data-href", "data-download", "data-src"];
    pub const DEFAULT_EXTENSIONS: &'static [&'static str] = &["wav", "mp3", "m4a", "ogg"];
}

impl Default for ScanSpec {
    fn default() -> Self {
        Self {
            attributes: Self::DEFAULT_ATTRIBUTES.iter().map(|s| s.to_string()).collect(),
            extensions: Self::DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Build the scan snippet evaluated inside a frame.
///
/// Returns an array of unique URL strings in DOM discovery order (`Set`
/// preserves insertion order). Extensions match at the end of the path,
/// tolerating query strings and fragments.
pub fn scan_script(spec: &ScanSpec) -> String {
    let attrs = serde_json::to_string(&spec.attributes).unwrap_or_else(|_| "[]".to_string());
    let exts: Vec<String> = spec
        .extensions
        .iter()
        .map(|e| {
            e.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
        })
        .filter(|e| !e.is_empty())
        .collect();
    let ext_alt = exts.join("|");

    format!(
        r#"(() => {{
            const found = new Set();
            document.querySelectorAll('audio,source').forEach(el => {{
                if (el.src) found.add(el.src);
            }});
            const attrs = {attrs};
            const extPat = new RegExp('\\.({ext_alt})([?#]|$)', 'i');
            document.querySelectorAll('*').forEach(el => {{
                for (const a of attrs) {{
                    const v = el.getAttribute && el.getAttribute(a);
                    if (v && (extPat.test(v) || /^blob:/i.test(v))) found.add(v);
                }}
            }});
            return [...found];
        }})()"#
    )
}

/// Scan one frame for candidate URLs.
///
/// Soft failure: a frame torn down mid-scan or with scripting denied yields
/// an empty set and a warning, never an error; one bad frame must not
/// abort collection from the others.
pub async fn scan_frame(frame: &dyn FrameContext, spec: &ScanSpec) -> Vec<String> {
    match try_scan(frame, spec).await {
        Ok(urls) => urls,
        Err(e) => {
            warn!(frame = frame.index(), "frame scan failed: {e:#}");
            Vec::new()
        }
    }
}

async fn try_scan(frame: &dyn FrameContext, spec: &ScanSpec) -> Result<Vec<String>> {
    let value = frame.evaluate(&scan_script(spec)).await?;
    let urls = value
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();
    Ok(urls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeFrame;

    #[test]
    fn test_scan_script_embeds_configured_sets() {
        let spec = ScanSpec {
            attributes: vec!["href".into(), "data-recording".into()],
            extensions: vec!["wav".into(), "flac".into()],
        };
        let js = scan_script(&spec);
        assert!(js.contains(r#"["href","data-recording"]"#));
        assert!(js.contains("wav|flac"));
        assert!(js.contains("audio,source"));
    }

    #[test]
    fn test_scan_script_sanitizes_extensions() {
        let spec = ScanSpec {
            attributes: vec!["src".into()],
            extensions: vec!["wav)|(".into()],
        };
        let js = scan_script(&spec);
        assert!(js.contains("(wav)"));
        assert!(!js.contains("wav)|("));
    }

    #[tokio::test]
    async fn test_scan_frame_returns_urls_in_order() {
        let frame = FakeFrame::new(0)
            .with_urls(["https://a/1.wav", "blob:https://a/xyz", "https://a/2.wav"]);
        let urls = scan_frame(&frame, &ScanSpec::default()).await;
        assert_eq!(
            urls,
            vec!["https://a/1.wav", "blob:https://a/xyz", "https://a/2.wav"]
        );
    }

    #[tokio::test]
    async fn test_scan_frame_soft_fails_to_empty() {
        let frame = FakeFrame::new(2).with_scan_failure();
        let urls = scan_frame(&frame, &ScanSpec::default()).await;
        assert!(urls.is_empty());
    }
}
