//! `AppProcessHarness` -- owns one app instance for one automated run.
//!
//! ```text
//! Idle --launch()--> Launching --spawn--> WaitingForDebugger --ready--> Connecting --attach--> Ready
//!   ^                    |                       |                        |                     |
//!   |                    +-------- error --------+---------- error -------+        close()      |
//!   |                                            v                                              v
//!   +------------------------------------- Closed <------------------ Closing <-----------------+
//! ```
//!
//! Any failure while launching runs `close()` before the error is returned,
//! so a failed launch never leaves a process or connection behind.

use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::automation::{Automation, AutomationConnection, CdpAutomation};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::platform::Platform;
use crate::probe;
use crate::process::AppProcess;
use crate::session::AutomationSession;
use crate::shutdown::{self, ShutdownRegistry};

/// Observable lifecycle phase of a harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Launching,
    WaitingForDebugger,
    Connecting,
    Ready,
    Closing,
    Closed,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Launching => "launching",
            LifecycleState::WaitingForDebugger => "waiting_for_debugger",
            LifecycleState::Connecting => "connecting",
            LifecycleState::Ready => "ready",
            LifecycleState::Closing => "closing",
            LifecycleState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Each state carries exactly the resources that exist in it.
enum HarnessState {
    Idle,
    Launching,
    WaitingForDebugger {
        process: AppProcess,
    },
    Connecting {
        process: AppProcess,
        connection: Option<Arc<dyn AutomationConnection>>,
    },
    Ready {
        process: AppProcess,
        session: AutomationSession,
    },
    Closing,
    Closed,
}

impl HarnessState {
    fn lifecycle(&self) -> LifecycleState {
        match self {
            HarnessState::Idle => LifecycleState::Idle,
            HarnessState::Launching => LifecycleState::Launching,
            HarnessState::WaitingForDebugger { .. } => LifecycleState::WaitingForDebugger,
            HarnessState::Connecting { .. } => LifecycleState::Connecting,
            HarnessState::Ready { .. } => LifecycleState::Ready,
            HarnessState::Closing => LifecycleState::Closing,
            HarnessState::Closed => LifecycleState::Closed,
        }
    }

    fn process(&self) -> Option<&AppProcess> {
        match self {
            HarnessState::WaitingForDebugger { process }
            | HarnessState::Connecting { process, .. }
            | HarnessState::Ready { process, .. } => Some(process),
            _ => None,
        }
    }

    /// Split into the live process and connection, if any.
    fn into_resources(self) -> (Option<AppProcess>, Option<Arc<dyn AutomationConnection>>) {
        match self {
            HarnessState::WaitingForDebugger { process } => (Some(process), None),
            HarnessState::Connecting {
                process,
                connection,
            } => (Some(process), connection),
            HarnessState::Ready { process, session } => {
                (Some(process), Some(Arc::clone(session.connection())))
            }
            _ => (None, None),
        }
    }
}

/// Launches the app with remote debugging, attaches an automation client
/// and guarantees teardown of both.
pub struct AppProcessHarness {
    id: Uuid,
    config: HarnessConfig,
    automation: Arc<dyn Automation>,
    registry: Arc<ShutdownRegistry>,
    http: reqwest::Client,
    state: HarnessState,
}

impl std::fmt::Debug for AppProcessHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppProcessHarness")
            .field("id", &self.id)
            .field("automation", &self.automation.name())
            .field("state", &self.state())
            .field("pid", &self.pid())
            .finish()
    }
}

impl AppProcessHarness {
    /// Harness using the CDP automation client.
    pub fn new(config: HarnessConfig) -> HarnessResult<Self> {
        Self::with_automation(config, Arc::new(CdpAutomation::new()?))
    }

    pub fn with_automation(
        config: HarnessConfig,
        automation: Arc<dyn Automation>,
    ) -> HarnessResult<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            config,
            automation,
            registry: shutdown::global(),
            http: probe::local_client()?,
            state: HarnessState::Idle,
        })
    }

    /// Register the app's finalizer with `registry` instead of the global one.
    pub fn with_registry(mut self, registry: Arc<ShutdownRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.state.lifecycle()
    }

    /// Pid of the app while it is being managed.
    pub fn pid(&self) -> Option<u32> {
        self.state.process().map(AppProcess::pid)
    }

    /// Launch the app and return a session on the first page of the first
    /// browser context.
    ///
    /// Calling this while `Ready` returns the existing session, unless the
    /// app has exited since, in which case it is closed and launched anew.
    /// On failure the harness is closed before the error is returned.
    pub async fn launch(&mut self) -> HarnessResult<AutomationSession> {
        let died = match &self.state {
            HarnessState::Ready { process, session } => match process.exit_status() {
                None => return Ok(session.clone()),
                Some(exit) => Some((process.pid(), exit)),
            },
            _ => None,
        };
        if let Some((pid, exit)) = died {
            warn!(harness = %self.id, pid, status = %exit, "app exited while ready, relaunching");
            self.close().await;
        }
        if !matches!(self.state, HarnessState::Idle | HarnessState::Closed) {
            // A previous launch was abandoned mid-flight.
            warn!(harness = %self.id, state = %self.state(), "discarding interrupted launch");
            self.close().await;
        }

        match self.try_launch().await {
            Ok(session) => Ok(session),
            Err(e) => {
                warn!(harness = %self.id, state = %self.state(), error = %e, "launch failed, cleaning up");
                self.close().await;
                Err(e)
            }
        }
    }

    async fn try_launch(&mut self) -> HarnessResult<AutomationSession> {
        self.enter(HarnessState::Launching);

        let family = Platform::current()?.family();
        let binary = self.config.binary.locate()?;

        let mut command = Command::new(&binary);
        command
            .envs(self.config.launch_env(family))
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        let process = AppProcess::spawn_with_registry("app", command, &self.registry)?;
        info!(harness = %self.id, pid = process.pid(), port = self.config.debug_port, "app spawned");
        self.enter(HarnessState::WaitingForDebugger { process });

        let ready = probe::wait_until_ready(
            &self.http,
            &self.config.version_url(),
            self.config.startup_timeout,
            self.config.poll_interval,
        )
        .await;
        let Some(elapsed) = ready else {
            let exit = self
                .state
                .process()
                .and_then(AppProcess::exit_status)
                .map(|exit| exit.to_string());
            return Err(HarnessError::StartupTimeout {
                timeout_ms: self.config.startup_timeout.as_millis() as u64,
                binary,
                exit,
            });
        };
        info!(harness = %self.id, elapsed_ms = elapsed.as_millis() as u64, "debug endpoint ready");

        let HarnessState::WaitingForDebugger { process } =
            std::mem::replace(&mut self.state, HarnessState::Launching)
        else {
            return Err(HarnessError::NotRunning);
        };
        self.enter(HarnessState::Connecting {
            process,
            connection: None,
        });

        let connection = self.automation.connect(&self.config.endpoint()).await?;
        if let HarnessState::Connecting { connection: slot, .. } = &mut self.state {
            *slot = Some(Arc::clone(&connection));
        }

        let contexts = connection.contexts().await?;
        let context = contexts.into_iter().next().ok_or_else(|| {
            HarnessError::Connection("automation endpoint exposes no browser contexts".to_string())
        })?;
        let page = context.pages.first().cloned().ok_or_else(|| {
            HarnessError::Connection("first browser context has no pages".to_string())
        })?;
        let page_session = connection.attach(&page).await.map_err(|e| match e {
            HarnessError::Connection(_) => e,
            other => HarnessError::Connection(format!(
                "failed to attach to page {}: {other}",
                page.target_id
            )),
        })?;

        let session = AutomationSession::new(connection, context, page, page_session);
        let HarnessState::Connecting { process, .. } =
            std::mem::replace(&mut self.state, HarnessState::Launching)
        else {
            return Err(HarnessError::NotRunning);
        };
        info!(
            harness = %self.id,
            pid = process.pid(),
            page = %session.page().target_id,
            url = %session.page().url,
            "harness ready"
        );
        self.enter(HarnessState::Ready {
            process,
            session: session.clone(),
        });
        Ok(session)
    }

    /// The session of a launched harness.
    pub fn session(&self) -> HarnessResult<AutomationSession> {
        match &self.state {
            HarnessState::Ready { session, .. } => Ok(session.clone()),
            _ => Err(HarnessError::NotRunning),
        }
    }

    /// Release the connection, then stop the app.
    ///
    /// Idempotent. Connection errors are logged and dropped. Afterwards the
    /// harness is `Closed` (or still `Idle` if it never launched) and may be
    /// launched again.
    pub async fn close(&mut self) {
        if matches!(self.state, HarnessState::Idle | HarnessState::Closed) {
            debug!(harness = %self.id, state = %self.state(), "close: nothing to release");
            return;
        }

        let previous = std::mem::replace(&mut self.state, HarnessState::Closing);
        debug!(harness = %self.id, from = %previous.lifecycle(), to = "closing", "state transition");
        let (process, connection) = previous.into_resources();

        if let Some(connection) = connection {
            if let Err(e) = connection.close().await {
                warn!(harness = %self.id, error = %e, "failed to close automation connection");
            }
        }

        if let Some(process) = process {
            let pid = process.pid();
            match process.terminate(self.config.grace_period).await {
                Some(exit) => info!(harness = %self.id, pid, status = %exit, "app stopped"),
                None => warn!(harness = %self.id, pid, "app did not report an exit"),
            }
        }

        self.enter(HarnessState::Closed);
    }

    fn enter(&mut self, next: HarnessState) {
        debug!(
            harness = %self.id,
            from = %self.state.lifecycle(),
            to = %next.lifecycle(),
            "state transition"
        );
        self.state = next;
    }
}

/// Construct a CDP harness and launch it.
pub async fn launch_app(
    config: HarnessConfig,
) -> HarnessResult<(AppProcessHarness, AutomationSession)> {
    let mut harness = AppProcessHarness::new(config)?;
    let session = harness.launch().await?;
    Ok((harness, session))
}
