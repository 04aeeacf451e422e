//! `mj-e2e driver` command: keep tauri-driver running for WebDriver tests.

use std::time::Duration;

use anyhow::{Context, Result};

use mj_harness::DriverService;

use crate::config::ResolvedConfig;
use crate::launch_cmd::graceful_shutdown;

pub async fn run_driver(resolved: &ResolvedConfig) -> Result<()> {
    let cancel = graceful_shutdown();

    println!("Starting {} ...", resolved.driver.binary.display());
    let mut driver = DriverService::start(resolved.driver.clone())
        .await
        .context("failed to start tauri-driver")?;
    println!("tauri-driver listening on {}", driver.config().base_url());
    println!("Press Ctrl+C to stop it.");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_millis(500)) => {
                driver.ensure_alive().context("tauri-driver stopped on its own")?;
            }
        }
    }
    driver.stop().await;
    println!("tauri-driver stopped.");
    Ok(())
}
