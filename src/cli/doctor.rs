//! Environment readiness check.

use anyhow::Result;

use crate::config::Config;
use crate::renderer::chromium::find_chromium;

/// Check Chromium availability, output root writability, and echo the
/// effective configuration.
pub async fn run() -> Result<()> {
    println!("Audioharvest Doctor");
    println!("===================");
    println!();

    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;
    println!("OS:   {os}");
    println!("Arch: {arch}");
    println!();

    let cfg = Config::from_env();

    let chromium = find_chromium(cfg.chromium_path.as_deref());
    match &chromium {
        Some(path) => println!("[OK] Chromium found: {}", path.display()),
        None => println!(
            "[!!] Chromium NOT found. Install google-chrome/chromium or set HARVEST_CHROMIUM_PATH."
        ),
    }

    // Output root: create if missing, then prove it is writable.
    match std::fs::create_dir_all(&cfg.output_root) {
        Ok(()) => {
            let probe = cfg.output_root.join(".doctor_probe");
            match std::fs::write(&probe, b"") {
                Ok(()) => {
                    let _ = std::fs::remove_file(&probe);
                    println!("[OK] Output root writable: {}", cfg.output_root.display());
                }
                Err(e) => println!(
                    "[!!] Output root not writable: {} ({e})",
                    cfg.output_root.display()
                ),
            }
        }
        Err(e) => println!(
            "[!!] Could not create output root: {} ({e})",
            cfg.output_root.display()
        ),
    }

    // Session material on offer.
    if !cfg.storage_state_b64.is_empty() {
        println!("[OK] Storage state configured (HARVEST_STORAGE_STATE_B64)");
    } else if cfg.has_credentials() {
        let totp = if cfg.totp_secret.is_empty() {
            "no TOTP"
        } else {
            "with TOTP"
        };
        println!("[OK] Form-login credentials configured ({totp})");
    } else {
        println!("[??] No session material; the run will only see public content");
    }

    println!();
    println!("Target:     {}", cfg.target_url);
    println!("Threshold:  {} bytes", cfg.min_bytes);
    println!("Readiness:  {:?}", cfg.readiness);
    println!("Headless:   {}", cfg.headless);
    println!();

    if chromium.is_some() {
        println!("Status: READY");
    } else {
        println!("Status: NOT READY");
    }
    Ok(())
}
