//! `mj-e2e invoke` command: call one backend command through the page.

use anyhow::{Context, Result};
use serde::Serialize;

use mj_bridge::{BookmarkList, BridgeCommand, CommandBridge, HistoryLog, RepoStatus, invoke};
use mj_harness::AppProcessHarness;

use crate::InvokeTarget;
use crate::config::ResolvedConfig;
use crate::launch_cmd::{graceful_shutdown, launch_or_cancel};

pub async fn run_invoke(
    resolved: &ResolvedConfig,
    target: InvokeTarget,
    repo: Option<String>,
    limit: Option<usize>,
) -> Result<()> {
    let cancel = graceful_shutdown();
    let mut harness = AppProcessHarness::new(resolved.harness.clone())?;
    let session = launch_or_cancel(&mut harness, &cancel).await?;

    let result = dispatch(&session, target, repo, limit).await;
    harness.close().await;

    println!("{}", result?);
    Ok(())
}

/// Call the command selected by `target` and render its response as JSON.
pub(crate) async fn dispatch(
    bridge: &(impl CommandBridge + ?Sized),
    target: InvokeTarget,
    repo_path: Option<String>,
    limit: Option<usize>,
) -> Result<String> {
    match target {
        InvokeTarget::Status => call(bridge, &RepoStatus { repo_path }).await,
        InvokeTarget::Log => call(bridge, &HistoryLog { repo_path, limit }).await,
        InvokeTarget::Bookmarks => call(bridge, &BookmarkList { repo_path }).await,
    }
}

async fn call<C>(bridge: &(impl CommandBridge + ?Sized), command: &C) -> Result<String>
where
    C: BridgeCommand,
    C::Response: Serialize,
{
    let response = invoke(bridge, command)
        .await
        .with_context(|| format!("{} failed", C::NAME))?;
    serde_json::to_string_pretty(&response).context("failed to render response")
}
