//! The `tauri-driver` WebDriver server and thin session management on top
//! of it.
//!
//! Only one driver can listen on a port, so callers start a single
//! [`DriverService`] per run and share it.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::probe::{self, PollAttempt};
use crate::process::AppProcess;
use crate::shutdown::{self, ShutdownRegistry};

pub const DEFAULT_DRIVER_PORT: u16 = 4444;

/// How to run the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    pub binary: PathBuf,
    pub port: u16,
    /// Budget for the driver to start answering `/status`.
    pub startup_timeout: Duration,
    pub poll_interval: Duration,
    /// When false, startup is a plain delay of `startup_timeout`.
    pub poll_readiness: bool,
    pub grace_period: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            binary: default_driver_binary(),
            port: DEFAULT_DRIVER_PORT,
            startup_timeout: Duration::from_millis(2000),
            poll_interval: Duration::from_millis(100),
            poll_readiness: true,
            grace_period: Duration::from_millis(1000),
        }
    }
}

impl DriverConfig {
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

/// `~/.cargo/bin/tauri-driver`, where `cargo install tauri-driver` puts it.
/// Falls back to a bare name looked up on `PATH` when there is no home
/// directory.
pub fn default_driver_binary() -> PathBuf {
    let name = if cfg!(windows) { "tauri-driver.exe" } else { "tauri-driver" };
    match dirs::home_dir() {
        Some(home) => home.join(".cargo").join("bin").join(name),
        None => PathBuf::from(name),
    }
}

/// A running driver process.
#[derive(Debug)]
pub struct DriverService {
    config: DriverConfig,
    http: reqwest::Client,
    process: Option<AppProcess>,
}

impl DriverService {
    pub async fn start(config: DriverConfig) -> HarnessResult<Self> {
        Self::start_with_registry(config, &shutdown::global()).await
    }

    /// Spawn the driver and wait for it to come up.
    ///
    /// A driver that exits during startup is [`HarnessError::DriverExited`].
    /// One that is still alive but silent when the budget runs out is
    /// assumed to be up.
    pub async fn start_with_registry(
        config: DriverConfig,
        registry: &Arc<ShutdownRegistry>,
    ) -> HarnessResult<Self> {
        let mut command = Command::new(&config.binary);
        if config.port != DEFAULT_DRIVER_PORT {
            command.arg("--port").arg(config.port.to_string());
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let mut process = AppProcess::spawn_with_registry("tauri-driver", command, registry)?;
        info!(pid = process.pid(), port = config.port, "starting tauri-driver");

        let http = probe::local_client()?;
        if config.poll_readiness {
            wait_for_status(&http, &config, &mut process).await?;
        } else if let Some(exit) = process.wait_for_exit(config.startup_timeout).await {
            return Err(HarnessError::DriverExited(exit.to_string()));
        }

        info!(pid = process.pid(), url = %config.base_url(), "tauri-driver started");
        Ok(Self {
            config,
            http,
            process: Some(process),
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(AppProcess::pid)
    }

    /// Fails if the driver is stopped or has died.
    pub fn ensure_alive(&self) -> HarnessResult<()> {
        let process = self
            .process
            .as_ref()
            .ok_or_else(|| HarnessError::Driver("driver is stopped".to_string()))?;
        match process.exit_status() {
            Some(exit) => Err(HarnessError::DriverExited(exit.to_string())),
            None => Ok(()),
        }
    }

    /// Open a WebDriver session that launches `application`. Returns the
    /// session id.
    pub async fn new_session(&self, application: &Path) -> HarnessResult<String> {
        self.ensure_alive()?;
        let body = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "wry",
                    "tauri:options": { "application": application },
                }
            }
        });
        let url = format!("{}/session", self.config.base_url());
        let response = self.request(self.http.post(&url).json(&body), &url).await?;

        let session_id = response
            .pointer("/value/sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| HarnessError::Driver(format!("no sessionId in response: {response}")))?;
        info!(session = session_id, application = %application.display(), "webdriver session created");
        Ok(session_id.to_string())
    }

    pub async fn delete_session(&self, session_id: &str) -> HarnessResult<()> {
        self.ensure_alive()?;
        let url = format!("{}/session/{session_id}", self.config.base_url());
        self.request(self.http.delete(&url), &url).await?;
        debug!(session = session_id, "webdriver session deleted");
        Ok(())
    }

    async fn request(&self, request: reqwest::RequestBuilder, url: &str) -> HarnessResult<Value> {
        let response = request
            .send()
            .await
            .map_err(|e| HarnessError::Driver(format!("{url}: {e}")))?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| HarnessError::Driver(format!("{url}: unreadable response: {e}")))?;

        if !status.is_success() {
            let message = body
                .pointer("/value/message")
                .and_then(Value::as_str)
                .unwrap_or("no message");
            return Err(HarnessError::Driver(format!("{url} returned {status}: {message}")));
        }
        Ok(body)
    }

    /// Stop the driver. Its exit is expected from here on.
    pub async fn stop(&mut self) {
        let Some(process) = self.process.take() else {
            return;
        };
        let pid = process.pid();
        debug!(pid, "stopping tauri-driver");
        match process.terminate(self.config.grace_period).await {
            Some(exit) => info!(pid, status = %exit, "tauri-driver stopped"),
            None => warn!(pid, "tauri-driver did not report an exit"),
        }
    }
}

async fn wait_for_status(
    http: &reqwest::Client,
    config: &DriverConfig,
    process: &mut AppProcess,
) -> HarnessResult<()> {
    let url = format!("{}/status", config.base_url());
    let start = Instant::now();

    while start.elapsed() < config.startup_timeout {
        if let Some(exit) = process.exit_status() {
            error!(status = %exit, "tauri-driver exited during startup");
            return Err(HarnessError::DriverExited(exit.to_string()));
        }
        if probe::poll_once(http, &url, config.poll_interval.max(Duration::from_millis(250))).await
            == PollAttempt::Ready
        {
            return Ok(());
        }
        if let Some(exit) = process.wait_for_exit(config.poll_interval).await {
            error!(status = %exit, "tauri-driver exited during startup");
            return Err(HarnessError::DriverExited(exit.to_string()));
        }
    }

    warn!(
        url = %url,
        timeout_ms = config.startup_timeout.as_millis() as u64,
        "tauri-driver did not answer /status in time, continuing"
    );
    Ok(())
}
