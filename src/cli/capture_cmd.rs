//! Interactive session capture.
//!
//! Opens a headed browser on the target page, waits for the operator to
//! complete the login (including any second factor) by hand, then persists
//! the resulting cookies as a storage-state file plus the base64 blob that
//! `HARVEST_STORAGE_STATE_B64` expects.

use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::Config;
use crate::renderer::chromium::ChromiumBrowser;
use crate::renderer::PageContext;
use crate::session::{encode_storage_state, StorageState};

pub async fn run() -> Result<()> {
    let cfg = Config::from_env();

    let staging = std::env::temp_dir().join("audioharvest-capture");
    std::fs::create_dir_all(&staging).context("could not create staging directory")?;

    // Always headed: the whole point is a human at the keyboard.
    let browser = ChromiumBrowser::launch(false, cfg.chromium_path.as_deref(), &staging).await?;
    let page = browser.new_page().await?;
    page.navigate(&cfg.target_url, cfg.nav_timeout_ms).await?;

    println!("A browser window is open on {}", cfg.target_url);
    println!("Log in completely (including any one-time code), then press Enter here.");
    wait_for_enter().await?;

    let cookies = page.cookies().await?;
    browser.shutdown().await?;

    let state = StorageState { cookies };
    let json = serde_json::to_string_pretty(&state)?;
    let blob = encode_storage_state(&state)?;

    write_artifact(Path::new("storage.json"), &json)?;
    write_artifact(Path::new("storage.b64.txt"), &blob)?;

    println!();
    println!("Captured {} cookies.", state.cookies.len());
    println!("  storage.json      (inspectable form)");
    println!("  storage.b64.txt   (export HARVEST_STORAGE_STATE_B64=$(cat storage.b64.txt))");
    Ok(())
}

async fn wait_for_enter() -> Result<()> {
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("failed to read from stdin")?;
    Ok(())
}

fn write_artifact(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write {}", path.display()))
}
