//! Evidence artifacts: screenshots and a page snapshot in the run
//! directory. Everything here is best-effort; callers log and continue.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::renderer::PageContext;

/// Full-page screenshot saved as `<label>.png`.
pub async fn screenshot(page: &dyn PageContext, dir: &Path, label: &str) -> Result<PathBuf> {
    let path = dir.join(format!("{label}.png"));
    page.screenshot(&path).await?;
    Ok(path)
}

/// Current page HTML saved as `page.html`.
pub async fn snapshot_html(page: &dyn PageContext, dir: &Path) -> Result<PathBuf> {
    let path = dir.join("page.html");
    let html = page.content().await?;
    tokio::fs::write(&path, html).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePage;

    #[tokio::test]
    async fn test_snapshot_writes_page_html() {
        let dir = tempfile::tempdir().unwrap();
        let page = FakePage::with_frames(vec![]);
        let path = snapshot_html(&page, dir.path()).await.unwrap();
        assert_eq!(path.file_name().unwrap(), "page.html");
        assert!(std::fs::read_to_string(path).unwrap().contains("<html>"));
    }

    #[tokio::test]
    async fn test_screenshot_uses_label() {
        let dir = tempfile::tempdir().unwrap();
        let page = FakePage::with_frames(vec![]);
        let path = screenshot(&page, dir.path(), "1_loaded").await.unwrap();
        assert_eq!(path.file_name().unwrap(), "1_loaded.png");
        assert!(path.exists());
    }
}
