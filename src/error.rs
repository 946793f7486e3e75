//! Fatal error taxonomy.
//!
//! Only failures that abort the whole run live here. Everything else
//! (session incompleteness, content not ready, empty discovery, probe
//! failures, per-strategy and per-asset download failures) is soft: logged
//! with context and handled locally by the component that hit it.

use std::path::PathBuf;
use thiserror::Error;

/// An error that aborts the run with a non-zero exit.
#[derive(Debug, Error)]
pub enum FatalError {
    /// Navigation retries exhausted.
    #[error("navigation to {url} failed after {attempts} attempts: {source:#}")]
    Navigation {
        url: String,
        attempts: u32,
        source: anyhow::Error,
    },

    /// The browser could not be launched or a page could not be created.
    #[error("browser startup failed: {0:#}")]
    Startup(anyhow::Error),

    /// The run output directory could not be created.
    #[error("could not create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
