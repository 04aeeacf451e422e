//! Child process ownership: spawn, exit monitoring, and termination.
//!
//! A monitor task owns the [`Child`] for its whole lifetime. The
//! [`AppProcess`] handle talks to it over a channel, so nothing else can
//! signal or wait on the process directly.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::shutdown::{self, ShutdownGuard, ShutdownRegistry};

/// How long to wait for the OS to reap a process after SIGKILL.
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
enum Signal {
    /// Ask the process to exit (SIGTERM on Unix).
    Terminate,
    /// Kill it outright.
    Kill,
}

/// How a monitored process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, `None` if the process was killed by a signal or its
    /// status could not be read.
    pub code: Option<i32>,
    pub description: String,
    /// Whether shutdown had been requested before the exit was observed.
    pub expected: bool,
}

impl ProcessExit {
    fn from_status(status: ExitStatus, expected: bool) -> Self {
        Self {
            code: status.code(),
            description: status.to_string(),
            expected,
        }
    }
}

impl std::fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.description)
    }
}

/// Handle to a spawned, monitored child process.
#[derive(Debug)]
pub struct AppProcess {
    pid: u32,
    program: PathBuf,
    label: &'static str,
    signals: mpsc::UnboundedSender<Signal>,
    exit: watch::Receiver<Option<ProcessExit>>,
    expected_exit: Arc<AtomicBool>,
    _shutdown: ShutdownGuard,
}

impl AppProcess {
    /// Spawn `command` and start monitoring it, registering a kill
    /// finalizer with the global shutdown registry.
    pub fn spawn(label: &'static str, command: Command) -> HarnessResult<Self> {
        Self::spawn_with_registry(label, command, &shutdown::global())
    }

    pub fn spawn_with_registry(
        label: &'static str,
        mut command: Command,
        registry: &Arc<ShutdownRegistry>,
    ) -> HarnessResult<Self> {
        let program = PathBuf::from(command.as_std().get_program());
        command.kill_on_drop(true);

        let child = command.spawn().map_err(|source| HarnessError::Spawn {
            program: program.clone(),
            source,
        })?;
        let pid = child.id().ok_or_else(|| HarnessError::Spawn {
            program: program.clone(),
            source: std::io::Error::other("child process has no pid"),
        })?;

        info!(pid, label, program = %program.display(), "spawned process");

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        let expected_exit = Arc::new(AtomicBool::new(false));

        tokio::spawn(monitor(
            child,
            pid,
            label,
            signal_rx,
            exit_tx,
            Arc::clone(&expected_exit),
        ));

        let guard = registry.register(format!("{label} (pid {pid})"), move || {
            shutdown::kill_pid(pid)
        });

        Ok(Self {
            pid,
            program,
            label,
            signals: signal_tx,
            exit: exit_rx,
            expected_exit,
            _shutdown: guard,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    /// Exit information if the process has already ended.
    pub fn exit_status(&self) -> Option<ProcessExit> {
        self.exit.borrow().clone()
    }

    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// Wait up to `limit` for the process to end on its own.
    pub async fn wait_for_exit(&mut self, limit: Duration) -> Option<ProcessExit> {
        // A closed channel also means the monitor is done.
        let ended = tokio::time::timeout(limit, self.exit.wait_for(Option::is_some))
            .await
            .is_ok();
        if ended { self.exit_status() } else { None }
    }

    /// Graceful then forceful termination.
    ///
    /// Marks the exit as expected, sends the termination signal, waits up
    /// to `grace`, then kills the process if it is still alive.
    pub async fn terminate(mut self, grace: Duration) -> Option<ProcessExit> {
        self.expected_exit.store(true, Ordering::SeqCst);
        if let Some(exit) = self.exit_status() {
            debug!(pid = self.pid, label = self.label, status = %exit, "process already exited");
            return Some(exit);
        }

        debug!(pid = self.pid, label = self.label, "sending termination signal");
        let _ = self.signals.send(Signal::Terminate);
        if let Some(exit) = self.wait_for_exit(grace).await {
            return Some(exit);
        }

        debug!(
            pid = self.pid,
            label = self.label,
            grace_ms = grace.as_millis() as u64,
            "process still running after grace period, killing"
        );
        let _ = self.signals.send(Signal::Kill);
        let exit = self.wait_for_exit(KILL_REAP_TIMEOUT).await;
        if exit.is_none() {
            warn!(pid = self.pid, label = self.label, "process did not exit after kill");
        }
        exit
    }
}

async fn monitor(
    mut child: Child,
    pid: u32,
    label: &'static str,
    mut signals: mpsc::UnboundedReceiver<Signal>,
    exit_tx: watch::Sender<Option<ProcessExit>>,
    expected_exit: Arc<AtomicBool>,
) {
    // Once the handle is dropped the channel closes; kill once and keep
    // waiting for the exit.
    let mut handle_alive = true;

    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            signal = signals.recv(), if handle_alive => match signal {
                Some(Signal::Terminate) => send_terminate(&mut child, pid),
                Some(Signal::Kill) => {
                    if let Err(e) = child.start_kill() {
                        debug!(pid, error = %e, "kill failed");
                    }
                }
                None => {
                    handle_alive = false;
                    expected_exit.store(true, Ordering::SeqCst);
                    debug!(pid, label, "process handle dropped, killing");
                    let _ = child.start_kill();
                }
            },
        }
    };

    let expected = expected_exit.load(Ordering::SeqCst);
    let exit = match status {
        Ok(status) => ProcessExit::from_status(status, expected),
        Err(e) => {
            warn!(pid, label, error = %e, "failed to wait on process");
            ProcessExit {
                code: None,
                description: format!("wait failed: {e}"),
                expected,
            }
        }
    };

    if expected {
        debug!(pid, label, status = %exit, "process exited");
    } else {
        error!(pid, label, status = %exit, "process exited unexpectedly");
    }

    let _ = exit_tx.send(Some(exit));
}

#[cfg(unix)]
fn send_terminate(_child: &mut Child, pid: u32) {
    // SAFETY: pid is a live child owned by this monitor; it has not been
    // reaped yet because wait() has not returned.
    let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
    if ret != 0 {
        warn!(pid, "SIGTERM failed");
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child, pid: u32) {
    // No graceful signal on this platform.
    if let Err(e) = child.start_kill() {
        warn!(pid, error = %e, "terminate failed");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use mj_test_utils::{FakeApp, write_fake_app};
    use std::time::Instant;

    fn command_for(path: &std::path::Path) -> Command {
        Command::new(path)
    }

    #[tokio::test]
    async fn terminate_stops_a_cooperative_process() {
        let tmp = tempfile::tempdir().unwrap();
        let app = write_fake_app(tmp.path(), FakeApp::Sleeper);
        let registry = Arc::new(ShutdownRegistry::default());

        let process = AppProcess::spawn_with_registry("app", command_for(&app), &registry).unwrap();
        assert!(process.pid() > 0);
        assert!(!process.has_exited());
        assert_eq!(registry.len(), 1);

        let start = Instant::now();
        let exit = process.terminate(Duration::from_secs(2)).await.unwrap();
        assert!(exit.expected);
        assert!(start.elapsed() < Duration::from_secs(2), "should not wait the full grace");
        assert!(registry.is_empty(), "finalizer should be deregistered");
    }

    #[tokio::test]
    async fn terminate_escalates_to_kill_after_grace() {
        let tmp = tempfile::tempdir().unwrap();
        let app = write_fake_app(tmp.path(), FakeApp::IgnoresTerm);
        let registry = Arc::new(ShutdownRegistry::default());

        let process = AppProcess::spawn_with_registry("app", command_for(&app), &registry).unwrap();
        // Let the script install its trap before signalling.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let start = Instant::now();
        let exit = process.terminate(Duration::from_millis(300)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert_eq!(exit.code, None, "killed by signal, got {exit:?}");
        assert!(exit.expected);
    }

    #[tokio::test]
    async fn self_exit_is_reported_as_unexpected() {
        let tmp = tempfile::tempdir().unwrap();
        let app = write_fake_app(tmp.path(), FakeApp::ExitsWith(3));
        let registry = Arc::new(ShutdownRegistry::default());

        let mut process =
            AppProcess::spawn_with_registry("app", command_for(&app), &registry).unwrap();
        let exit = process.wait_for_exit(Duration::from_secs(5)).await.unwrap();
        assert_eq!(exit.code, Some(3));
        assert!(!exit.expected);

        // Terminating an exited process returns the recorded exit.
        assert_eq!(process.terminate(Duration::from_millis(100)).await, Some(exit));
    }

    #[tokio::test]
    async fn spawn_failure_names_the_program() {
        let registry = Arc::new(ShutdownRegistry::default());
        let err = AppProcess::spawn_with_registry(
            "app",
            Command::new("/nonexistent/path/to/app"),
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, HarnessError::Spawn { .. }));
        assert!(err.to_string().contains("/nonexistent/path/to/app"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn dropping_the_handle_kills_the_process() {
        let tmp = tempfile::tempdir().unwrap();
        let app = write_fake_app(tmp.path(), FakeApp::Sleeper);
        let registry = Arc::new(ShutdownRegistry::default());

        let process = AppProcess::spawn_with_registry("app", command_for(&app), &registry).unwrap();
        let pid = process.pid();
        drop(process);

        let start = Instant::now();
        loop {
            // SAFETY: signal 0 only probes for existence.
            let alive = unsafe { libc::kill(pid as i32, 0) } == 0;
            if !alive {
                break;
            }
            assert!(start.elapsed() < Duration::from_secs(5), "process {pid} still alive");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}
