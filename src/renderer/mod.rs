//! Browser abstraction for the harvest pipeline.
//!
//! Defines the `PageContext` and `FrameContext` traits that abstract over
//! the browser engine (currently Chromium via chromiumoxide). The pipeline
//! only ever talks to these traits, which keeps discovery, probing, and the
//! download strategy chain testable without a real browser.

pub mod chromium;

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;

use crate::session::SessionCookie;

/// A file the browser finished downloading into the staging directory.
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    /// Where the engine wrote the file.
    pub path: PathBuf,
    /// The engine-suggested filename (the staged file's name).
    pub suggested_name: String,
}

/// A live page: the main document plus any embedded frames.
#[async_trait]
pub trait PageContext: Send + Sync {
    /// Navigate to a URL with a timeout.
    async fn navigate(&self, url: &str, timeout_ms: u64) -> Result<()>;

    /// Execute JavaScript in the main document and return the result.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// Snapshot the frames composing the page right now, main document
    /// first, then sub-frames in discovery order. Frames created after the
    /// call are not included.
    async fn frames(&self) -> Result<Vec<Box<dyn FrameContext>>>;

    /// Poll until a CSS selector matches, or the timeout elapses.
    /// Returns whether the selector ever matched.
    async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<bool>;

    /// List the files currently in the download staging area, completed
    /// or in flight. Taken as a snapshot before triggering a download so
    /// stale files are never mistaken for the new one.
    async fn staged_files(&self) -> Result<Vec<PathBuf>>;

    /// Wait for a client-initiated download to land in the staging
    /// directory, ignoring every path in `seen` (the pre-trigger
    /// snapshot). Errors when the timeout elapses with nothing new.
    async fn wait_for_download(&self, timeout_ms: u64, seen: &[PathBuf])
        -> Result<DownloadedFile>;

    /// Capture a full-page screenshot.
    async fn screenshot(&self, path: &Path) -> Result<()>;

    /// Get the full page HTML.
    async fn content(&self) -> Result<String>;

    /// Get the current URL.
    async fn current_url(&self) -> Result<String>;

    /// Install cookies into the browsing context.
    async fn set_cookies(&self, cookies: Vec<SessionCookie>) -> Result<()>;

    /// Read the context's current cookies.
    async fn cookies(&self) -> Result<Vec<SessionCookie>>;
}

/// One frame of a page. Ephemeral `blob:` handles discovered in a frame are
/// only dereferenceable here, inside the execution context that created
/// them, so every operation on such a handle is dispatched through the
/// owning frame and comes back as a context-independent value.
#[async_trait]
pub trait FrameContext: Send + Sync {
    /// Position of this frame in the enumeration snapshot (0 = main).
    fn index(&self) -> usize;

    /// Execute JavaScript inside this frame and return the result.
    /// Promises are awaited before the value crosses back.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;
}

/// Escape a string for safe injection into a JavaScript string literal.
///
/// Escapes everything that could break out of a JS string context:
/// backslashes, quotes, backticks, newlines, and angle brackets (to prevent
/// `</script>` injection). Null bytes are stripped.
pub fn js_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 8);
    for ch in s.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\'' => result.push_str("\\'"),
            '"' => result.push_str("\\\""),
            '`' => result.push_str("\\`"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            '\0' => {}
            '<' => result.push_str("\\x3c"),
            '>' => result.push_str("\\x3e"),
            _ => result.push(ch),
        }
    }
    result
}
