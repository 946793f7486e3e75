// Copyright 2026 Audioharvest Contributors
// SPDX-License-Identifier: Apache-2.0

//! Environment-sourced run configuration.
//!
//! Every recognized option has a `HARVEST_*` variable and a default, so a
//! bare `audioharvest run` against the default target does something
//! sensible. The whole set is resolved once into an owned [`Config`] at
//! startup; no module reads the environment after that.

use std::path::PathBuf;

use crate::pipeline::discover::ScanSpec;

/// How to decide the page is ready for discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Wait for the document `load` event.
    Load,
    /// Wait for `DOMContentLoaded`.
    DomContentLoaded,
    /// Wait for a CSS selector to appear.
    Selector(String),
}

impl Readiness {
    /// Parse a readiness condition. Anything that is not a known load-state
    /// keyword is treated as a CSS selector.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "load" => Readiness::Load,
            "domcontentloaded" => Readiness::DomContentLoaded,
            other => Readiness::Selector(other.to_string()),
        }
    }
}

/// Resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct Config {
    /// The page to scrape.
    pub target_url: String,
    /// Minimum asset size in bytes; smaller candidates are excluded.
    pub min_bytes: u64,
    /// Content-readiness predicate.
    pub readiness: Readiness,
    /// Navigation timeout in milliseconds.
    pub nav_timeout_ms: u64,
    /// Bounded wait for a browser download event, in milliseconds.
    pub dl_timeout_ms: u64,
    /// Launch the browser headless.
    pub headless: bool,
    /// Supplementary scroll-to-bottom rounds after readiness.
    pub scroll_rounds: u32,
    /// Pause between successive downloads, in milliseconds.
    pub pause_between_ms: u64,
    /// Settle delay before discovery, in milliseconds.
    pub settle_ms: u64,
    /// Retry budget when a discovery pass finds nothing.
    pub discovery_retries: u32,
    /// Cooldown before a discovery retry, in milliseconds.
    pub retry_cooldown_ms: u64,
    /// Pause between successive size probes within a frame, in milliseconds.
    pub probe_pause_ms: u64,
    /// Login identifier (optional; empty means no form login).
    pub email: String,
    /// Login secret.
    pub password: String,
    /// Time-based one-time-code seed (optional).
    pub totp_secret: String,
    /// Base64-encoded pre-authenticated storage state, alternative to
    /// credentials.
    pub storage_state_b64: String,
    /// Parent directory for per-run output directories.
    pub output_root: PathBuf,
    /// Candidate attribute and extension sets for the frame scan.
    pub scan: ScanSpec,
    /// Browser binary override.
    pub chromium_path: Option<PathBuf>,
}

impl Config {
    /// Resolve the configuration from `HARVEST_*` environment variables,
    /// falling back to defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let min_mb = env_u64("HARVEST_MIN_MB", 1);
        Self {
            target_url: env_str("HARVEST_TARGET_URL", "https://app.gohighlevel.com/"),
            min_bytes: min_mb.saturating_mul(1024 * 1024),
            readiness: Readiness::parse(&env_str("HARVEST_WAIT_FOR", "load")),
            nav_timeout_ms: env_u64("HARVEST_NAV_TIMEOUT_MS", 45_000),
            dl_timeout_ms: env_u64("HARVEST_DL_TIMEOUT_MS", 60_000),
            headless: env_bool("HARVEST_HEADLESS", true),
            scroll_rounds: env_u64("HARVEST_SCROLL_ROUNDS", 0) as u32,
            pause_between_ms: env_u64("HARVEST_PAUSE_BETWEEN_MS", 900),
            settle_ms: env_u64("HARVEST_SETTLE_MS", 1_500),
            discovery_retries: env_u64("HARVEST_DISCOVERY_RETRIES", 1) as u32,
            retry_cooldown_ms: env_u64("HARVEST_RETRY_COOLDOWN_MS", 3_000),
            probe_pause_ms: env_u64("HARVEST_PROBE_PAUSE_MS", 30),
            email: env_str("HARVEST_EMAIL", ""),
            password: env_str("HARVEST_PASSWORD", ""),
            totp_secret: env_str("HARVEST_TOTP_SECRET", ""),
            storage_state_b64: env_str("HARVEST_STORAGE_STATE_B64", ""),
            output_root: PathBuf::from(env_str("HARVEST_OUTPUT_ROOT", "outputs")),
            scan: ScanSpec {
                attributes: env_list("HARVEST_ATTRS", ScanSpec::DEFAULT_ATTRIBUTES),
                extensions: env_list("HARVEST_EXTENSIONS", ScanSpec::DEFAULT_EXTENSIONS),
            },
            chromium_path: std::env::var("HARVEST_CHROMIUM_PATH")
                .ok()
                .map(PathBuf::from),
        }
    }

    /// Whether form-login credentials are configured.
    pub fn has_credentials(&self) -> bool {
        !self.email.is_empty() && !self.password.is_empty()
    }
}

impl Default for Config {
    /// Defaults without touching the environment. Used by tests.
    fn default() -> Self {
        Self {
            target_url: "https://app.gohighlevel.com/".to_string(),
            min_bytes: 1024 * 1024,
            readiness: Readiness::Load,
            nav_timeout_ms: 45_000,
            dl_timeout_ms: 60_000,
            headless: true,
            scroll_rounds: 0,
            pause_between_ms: 900,
            settle_ms: 1_500,
            discovery_retries: 1,
            retry_cooldown_ms: 3_000,
            probe_pause_ms: 30,
            email: String::new(),
            password: String::new(),
            totp_secret: String::new(),
            storage_state_b64: String::new(),
            output_root: PathBuf::from("outputs"),
            scan: ScanSpec::default(),
            chromium_path: None,
        }
    }
}

fn env_str(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => default.to_string(),
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => !matches!(v.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no"),
        Err(_) => default,
    }
}

fn env_list(key: &str, defaults: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => defaults.iter().map(|s| s.to_string()).collect(),
    }
}
