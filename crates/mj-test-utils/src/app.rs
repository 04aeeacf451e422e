#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Behaviour of a fake app binary.
///
/// Every variant writes its pid to `$FAKE_APP_PIDFILE` and its
/// environment to `$FAKE_APP_ENVFILE` when those are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeApp {
    /// Sleeps until signalled.
    Sleeper,
    /// Sleeps and ignores SIGTERM, so only SIGKILL stops it.
    IgnoresTerm,
    /// Exits immediately with the given code.
    ExitsWith(i32),
}

impl FakeApp {
    fn body(self) -> String {
        match self {
            // exec keeps the pid, so signals reach the sleeping process.
            FakeApp::Sleeper => "exec sleep 3600".to_string(),
            FakeApp::IgnoresTerm => "trap '' TERM\nexec sleep 3600".to_string(),
            FakeApp::ExitsWith(code) => format!("exit {code}"),
        }
    }
}

static SCRIPT_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Write an executable fake app into `dir` and return its path.
pub fn write_fake_app(dir: &Path, kind: FakeApp) -> PathBuf {
    let n = SCRIPT_COUNTER.fetch_add(1, Ordering::Relaxed);
    let path = dir.join(format!("fake-app-{n}"));
    let script = format!(
        "#!/bin/sh\n\
         if [ -n \"$FAKE_APP_PIDFILE\" ]; then echo $$ > \"$FAKE_APP_PIDFILE\"; fi\n\
         if [ -n \"$FAKE_APP_ENVFILE\" ]; then env > \"$FAKE_APP_ENVFILE\"; fi\n\
         {}\n",
        kind.body()
    );
    std::fs::write(&path, script).expect("failed to write fake app");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("failed to make fake app executable");
    path
}
