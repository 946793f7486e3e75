// Copyright 2026 Audioharvest Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;

use audioharvest::cli;

#[derive(Parser)]
#[command(
    name = "audioharvest",
    about = "Audioharvest — authenticated audio-asset harvester for dynamic web pages",
    version,
    after_help = "Run 'audioharvest <command> --help' for details on each command.\nRun 'audioharvest' with no command to start a harvest run."
)]
struct Cli {
    /// Suppress non-essential output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a harvest against the configured target (the default)
    Run,
    /// Open a headed browser to capture an authenticated session
    CaptureSession,
    /// Check environment and diagnose issues
    Doctor,
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);

    let result = match cli.command {
        // No subcommand starts a harvest run.
        None | Some(Commands::Run) => cli::run_cmd::run().await,
        Some(Commands::CaptureSession) => cli::capture_cmd::run().await,
        Some(Commands::Doctor) => cli::doctor::run().await,
        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "audioharvest", &mut std::io::stdout());
            Ok(())
        }
    };

    // Consistent exit codes: 0=success, 1=error
    if let Err(e) = &result {
        eprintln!("  Error: {e:#}");
        std::process::exit(1);
    }
    result
}

fn init_tracing(quiet: bool, verbose: bool) {
    let default = if quiet {
        "audioharvest=error"
    } else if verbose {
        "audioharvest=debug"
    } else {
        "audioharvest=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
