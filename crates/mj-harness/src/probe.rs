//! Readiness polling of the debug endpoint.

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::{HarnessError, HarnessResult};

/// Upper bound on a single poll request, so one hung request cannot eat
/// the whole startup budget.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);

/// HTTP client for talking to loopback endpoints. Proxy settings from the
/// environment are ignored so `127.0.0.1` is always reached directly.
pub fn local_client() -> HarnessResult<reqwest::Client> {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .map_err(|e| HarnessError::Configuration(format!("failed to build HTTP client: {e}")))
}

/// Outcome of a single poll attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollAttempt {
    Ready,
    /// The endpoint answered, but not with a 2xx.
    NotReady(u16),
    /// Nothing answered (connection refused, reset, timed out).
    Unreachable(String),
}

/// Issue one GET against `url`.
pub async fn poll_once(client: &reqwest::Client, url: &str, limit: Duration) -> PollAttempt {
    match client.get(url).timeout(limit).send().await {
        Ok(response) if response.status().is_success() => PollAttempt::Ready,
        Ok(response) => PollAttempt::NotReady(response.status().as_u16()),
        Err(e) => PollAttempt::Unreachable(e.to_string()),
    }
}

/// Poll `url` every `interval` until it answers 2xx or `timeout` elapses.
///
/// Failed attempts only mean "not ready yet". Returns the time it took to
/// become ready, or `None` when the budget ran out.
pub async fn wait_until_ready(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
    interval: Duration,
) -> Option<Duration> {
    let start = Instant::now();
    let mut attempts = 0u32;

    while start.elapsed() < timeout {
        attempts += 1;
        let remaining = timeout.saturating_sub(start.elapsed());
        match poll_once(client, url, remaining.min(ATTEMPT_TIMEOUT)).await {
            PollAttempt::Ready => {
                let elapsed = start.elapsed();
                debug!(url, attempts, elapsed_ms = elapsed.as_millis() as u64, "endpoint ready");
                return Some(elapsed);
            }
            PollAttempt::NotReady(status) => trace!(url, status, "endpoint not ready"),
            PollAttempt::Unreachable(reason) => trace!(url, reason = %reason, "endpoint unreachable"),
        }
        tokio::time::sleep(interval).await;
    }

    debug!(url, attempts, "endpoint not ready within budget");
    None
}
