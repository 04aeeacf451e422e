//! Process-wide shutdown registry.
//!
//! Every live child process registers a synchronous finalizer here and
//! holds the returned [`ShutdownGuard`]. Dropping the guard (which happens
//! when the process is closed normally) deregisters the finalizer. If the
//! test runner itself is told to terminate, [`install_signal_handlers`]
//! runs whatever finalizers are still registered so no app instance
//! outlives the run.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type Finalizer = Box<dyn FnOnce() + Send>;

#[derive(Default)]
pub struct ShutdownRegistry {
    next_id: AtomicU64,
    finalizers: Mutex<BTreeMap<u64, (String, Finalizer)>>,
}

impl std::fmt::Debug for ShutdownRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownRegistry")
            .field("registered", &self.len())
            .finish()
    }
}

static GLOBAL: LazyLock<Arc<ShutdownRegistry>> = LazyLock::new(Arc::default);

/// The registry shared by the whole process.
pub fn global() -> Arc<ShutdownRegistry> {
    Arc::clone(&GLOBAL)
}

impl ShutdownRegistry {
    /// Register `finalizer` under a human-readable label.
    pub fn register(
        self: &Arc<Self>,
        label: impl Into<String>,
        finalizer: impl FnOnce() + Send + 'static,
    ) -> ShutdownGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let label = label.into();
        debug!(id, label = %label, "registering shutdown finalizer");
        self.lock().insert(id, (label, Box::new(finalizer)));
        ShutdownGuard {
            registry: Arc::clone(self),
            id,
        }
    }

    /// Number of finalizers currently registered.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run and remove every registered finalizer. Returns how many ran.
    pub fn run_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.lock());
        let count = drained.len();
        for (id, (label, finalizer)) in drained {
            info!(id, label = %label, "running shutdown finalizer");
            finalizer();
        }
        count
    }

    fn deregister(&self, id: u64) {
        if self.lock().remove(&id).is_some() {
            debug!(id, "deregistered shutdown finalizer");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, (String, Finalizer)>> {
        self.finalizers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps a finalizer registered for as long as it is alive.
#[derive(Debug)]
pub struct ShutdownGuard {
    registry: Arc<ShutdownRegistry>,
    id: u64,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}

/// Forcefully kill a process by pid without needing its handle.
pub(crate) fn kill_pid(pid: u32) {
    #[cfg(unix)]
    {
        // SAFETY: plain syscall on a pid we spawned; a stale pid fails with ESRCH.
        let ret = unsafe { libc::kill(pid as i32, libc::SIGKILL) };
        if ret != 0 {
            debug!(pid, "SIGKILL from finalizer failed (already exited?)");
        }
    }
    #[cfg(windows)]
    {
        let result = std::process::Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status();
        if let Err(e) = result {
            warn!(pid, error = %e, "taskkill failed");
        }
    }
}

/// Listen for termination signals (Ctrl+C, SIGTERM, SIGHUP).
///
/// With a `graceful` token, the first signal cancels it so the caller can
/// close its harness normally, and a second signal runs the finalizers and
/// exits. Without one, the first signal does that immediately.
pub fn install_signal_handlers(
    registry: Arc<ShutdownRegistry>,
    graceful: Option<CancellationToken>,
) -> JoinHandle<()> {
    let got_first_signal = Arc::new(AtomicBool::new(false));

    tokio::spawn(async move {
        loop {
            wait_for_signal().await;
            match &graceful {
                Some(token) if !got_first_signal.swap(true, Ordering::SeqCst) => {
                    eprintln!("\nShutting down gracefully (Ctrl+C again to force)...");
                    token.cancel();
                }
                _ => {
                    let ran = registry.run_all();
                    warn!(finalizers = ran, "terminated by signal");
                    std::process::exit(130);
                }
            }
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let (Ok(mut term), Ok(mut hup)) = (signal(SignalKind::terminate()), signal(SignalKind::hangup()))
    else {
        warn!("failed to install SIGTERM/SIGHUP handlers; listening for Ctrl+C only");
        tokio::signal::ctrl_c().await.ok();
        return;
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
        _ = hup.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    tokio::signal::ctrl_c().await.ok();
}
