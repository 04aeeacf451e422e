//! `mj-e2e launch` command: start the app under the harness and report
//! the page it attached to.

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use mj_harness::{AppProcessHarness, AutomationSession, shutdown};

use crate::config::ResolvedConfig;

/// Install the Ctrl+C handling used by the interactive commands: the first
/// signal cancels the returned token, a second one kills every child and
/// exits.
pub(crate) fn graceful_shutdown() -> CancellationToken {
    let cancel = CancellationToken::new();
    shutdown::install_signal_handlers(shutdown::global(), Some(cancel.clone()));
    cancel
}

/// Launch `harness`, giving up if `cancel` fires first. The harness is
/// closed on every failure path.
pub(crate) async fn launch_or_cancel(
    harness: &mut AppProcessHarness,
    cancel: &CancellationToken,
) -> Result<AutomationSession> {
    let launched = tokio::select! {
        result = harness.launch() => Some(result),
        _ = cancel.cancelled() => None,
    };
    match launched {
        Some(result) => result.context("failed to launch the app"),
        None => {
            harness.close().await;
            anyhow::bail!("interrupted while launching")
        }
    }
}

pub async fn run_launch(resolved: &ResolvedConfig, build: bool, hold: bool) -> Result<()> {
    if build {
        resolved.build.run().await.context("build step failed")?;
    }

    let cancel = graceful_shutdown();
    let mut harness = AppProcessHarness::new(resolved.harness.clone())?;

    println!("Launching {} ...", resolved.harness.binary.primary.display());
    let session = launch_or_cancel(&mut harness, &cancel).await?;

    let page = session.page();
    println!("Attached to page {}", page.target_id);
    println!("  url:   {}", page.url);
    println!("  title: {}", page.title);
    if let Some(pid) = harness.pid() {
        println!("  pid:   {pid}");
    }

    if hold {
        println!("\nApp is running. Press Ctrl+C to close it.");
        cancel.cancelled().await;
    }

    harness.close().await;
    println!("App closed.");
    Ok(())
}
