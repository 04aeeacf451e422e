//! Lifecycle tests for `AppProcessHarness` against fake app binaries and a
//! fake CDP endpoint.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mj_bridge::{BookmarkList, BridgeError, RepoStatus, invoke};
use mj_harness::{
    AppProcessHarness, Automation, AutomationConnection, BrowsingContext, HarnessConfig,
    HarnessError, HarnessResult, LifecycleState, PageInfo, ShutdownRegistry, launch_app,
};
use mj_test_utils::{FakeApp, FakeBrowser, FakeTarget, unused_port, write_fake_app};
use serde_json::{Value, json};

fn config(binary: &Path, port: u16) -> HarnessConfig {
    HarnessConfig::new(binary.to_path_buf())
        .with_debug_port(port)
        .with_startup_timeout(Duration::from_millis(500))
        .with_grace_period(Duration::from_millis(500))
}

fn new_harness(config: HarnessConfig) -> (AppProcessHarness, Arc<ShutdownRegistry>) {
    let registry = Arc::new(ShutdownRegistry::default());
    let harness = AppProcessHarness::new(config)
        .unwrap()
        .with_registry(Arc::clone(&registry));
    (harness, registry)
}

fn pid_is_alive(pid: i32) -> bool {
    // SAFETY: signal 0 only probes for existence.
    unsafe { libc::kill(pid, 0) == 0 }
}

async fn read_when_written(path: &Path) -> String {
    let start = Instant::now();
    loop {
        if let Ok(contents) = std::fs::read_to_string(path) {
            if !contents.is_empty() {
                return contents;
            }
        }
        assert!(start.elapsed() < Duration::from_secs(3), "{} never written", path.display());
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn close_before_launch_is_a_noop() {
    let (mut harness, _) = new_harness(config(Path::new("/nonexistent/app"), unused_port()));

    harness.close().await;
    harness.close().await;
    assert_eq!(harness.state(), LifecycleState::Idle);
    assert!(matches!(harness.session(), Err(HarnessError::NotRunning)));
}

#[tokio::test]
async fn missing_binary_is_a_configuration_error() {
    let (mut harness, registry) = new_harness(config(Path::new("/nonexistent/app"), unused_port()));

    let err = harness.launch().await.unwrap_err();
    assert!(matches!(err, HarnessError::Configuration(ref m) if m.contains("/nonexistent/app")));
    assert_eq!(harness.state(), LifecycleState::Closed);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn non_executable_binary_is_a_spawn_error() {
    let tmp = tempfile::tempdir().unwrap();
    let binary = tmp.path().join("not-executable");
    std::fs::write(&binary, "#!/bin/sh\n").unwrap();

    let (mut harness, registry) = new_harness(config(&binary, unused_port()));
    let err = harness.launch().await.unwrap_err();
    assert!(matches!(err, HarnessError::Spawn { .. }), "{err}");
    assert_eq!(harness.state(), LifecycleState::Closed);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn startup_timeout_terminates_the_app() {
    let tmp = tempfile::tempdir().unwrap();
    let app = write_fake_app(tmp.path(), FakeApp::Sleeper);
    let pidfile = tmp.path().join("app.pid");
    let config = config(&app, unused_port())
        .with_env("FAKE_APP_PIDFILE", pidfile.to_string_lossy());
    let (mut harness, registry) = new_harness(config);

    let start = Instant::now();
    let err = harness.launch().await.unwrap_err();
    let elapsed = start.elapsed();

    match &err {
        HarnessError::StartupTimeout { timeout_ms, binary, exit } => {
            assert_eq!(*timeout_ms, 500);
            assert_eq!(binary, &app);
            assert_eq!(exit, &None, "app was still running at the deadline");
        }
        other => panic!("expected StartupTimeout, got {other}"),
    }
    assert!(err.to_string().contains("500ms"));
    assert!(elapsed >= Duration::from_millis(500), "gave up early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "took too long: {elapsed:?}");

    assert_eq!(harness.state(), LifecycleState::Closed);
    assert!(registry.is_empty());
    let pid: i32 = read_when_written(&pidfile).await.trim().parse().unwrap();
    assert!(!pid_is_alive(pid), "app {pid} survived a failed launch");
}

#[tokio::test]
async fn crashed_app_is_reported_in_the_timeout() {
    let tmp = tempfile::tempdir().unwrap();
    let app = write_fake_app(tmp.path(), FakeApp::ExitsWith(3));
    let (mut harness, _) = new_harness(config(&app, unused_port()));

    let err = harness.launch().await.unwrap_err();
    match err {
        HarnessError::StartupTimeout { exit: Some(status), .. } => {
            assert!(status.contains('3'), "{status}");
        }
        other => panic!("expected StartupTimeout with exit status, got {other}"),
    }
}

#[tokio::test]
async fn zero_contexts_is_a_connection_error_and_cleans_up() {
    let tmp = tempfile::tempdir().unwrap();
    let app = write_fake_app(tmp.path(), FakeApp::Sleeper);
    let browser = FakeBrowser::builder()
        .target(FakeTarget::other("sw", "service_worker", "ctx"))
        .start()
        .await;
    let (mut harness, registry) = new_harness(config(&app, browser.port()));

    let err = harness.launch().await.unwrap_err();
    assert!(matches!(err, HarnessError::Connection(_)), "{err}");
    assert_eq!(harness.state(), LifecycleState::Closed);
    assert!(matches!(harness.session(), Err(HarnessError::NotRunning)));
    assert!(registry.is_empty());
    assert!(
        browser.wait_for_closed_sockets(1, Duration::from_secs(2)).await,
        "automation connection was not closed"
    );
}

#[tokio::test]
async fn launch_waits_for_a_slow_endpoint() {
    let tmp = tempfile::tempdir().unwrap();
    let app = write_fake_app(tmp.path(), FakeApp::Sleeper);
    let browser = FakeBrowser::builder()
        .ready_after(Duration::from_millis(1200))
        .target(FakeTarget::page("main", "ctx").titled("Mighty Jujutsu"))
        .start()
        .await;
    let config = config(&app, browser.port()).with_startup_timeout(Duration::from_millis(5000));
    let (mut harness, _) = new_harness(config);

    let start = Instant::now();
    let session = harness.launch().await.unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(1100), "ready too early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(2500), "ready too late: {elapsed:?}");
    assert!(browser.version_hits() > 1, "endpoint should have been polled repeatedly");
    assert_eq!(session.page().title, "Mighty Jujutsu");
    harness.close().await;
}

#[tokio::test]
async fn ready_session_drives_the_page_and_the_backend() {
    let tmp = tempfile::tempdir().unwrap();
    let app = write_fake_app(tmp.path(), FakeApp::Sleeper);
    let browser = FakeBrowser::builder()
        .target(FakeTarget::page("main", "ctx-1").titled("Mighty Jujutsu"))
        .target(FakeTarget::page("devtools", "ctx-2"))
        .evaluate_returns("document.title", json!("Mighty Jujutsu"))
        .evaluate_returns("jj_status", json!("The working copy is clean"))
        .evaluate_rejects("jj_bookmark_list", "There is no jj repo in \".\"")
        .start()
        .await;
    let (mut harness, registry) = new_harness(config(&app, browser.port()));

    let session = harness.launch().await.unwrap();
    assert_eq!(harness.state(), LifecycleState::Ready);
    assert_eq!(session.page().target_id, "main");
    assert_eq!(registry.len(), 1);

    // A second launch hands back the cached session.
    let again = harness.launch().await.unwrap();
    assert_eq!(again.page(), session.page());
    assert_eq!(harness.session().unwrap().page(), session.page());

    assert_eq!(session.title().await.unwrap(), "Mighty Jujutsu");

    let status = invoke(&session, &RepoStatus { repo_path: Some("/repo".into()) })
        .await
        .unwrap();
    assert_eq!(status, "The working copy is clean");

    let err = invoke(&session, &BookmarkList::default()).await.unwrap_err();
    assert!(
        matches!(err, BridgeError::Rejected { ref message, .. } if message.contains("no jj repo")),
        "{err:?}"
    );

    let pid = harness.pid().unwrap() as i32;
    harness.close().await;
    assert_eq!(harness.state(), LifecycleState::Closed);
    assert!(!pid_is_alive(pid));
    assert!(registry.is_empty());
    assert!(browser.wait_for_closed_sockets(1, Duration::from_secs(2)).await);

    // The session is unusable once its harness is closed.
    assert!(session.title().await.is_err());
}

#[tokio::test]
async fn closed_harness_can_launch_again() {
    let tmp = tempfile::tempdir().unwrap();
    let app = write_fake_app(tmp.path(), FakeApp::Sleeper);
    let browser = FakeBrowser::builder().target(FakeTarget::page("main", "ctx")).start().await;
    let (mut harness, _) = new_harness(config(&app, browser.port()));

    harness.launch().await.unwrap();
    let first_pid = harness.pid().unwrap();
    harness.close().await;

    harness.launch().await.unwrap();
    assert_ne!(harness.pid().unwrap(), first_pid);
    harness.close().await;
    harness.close().await;
    assert_eq!(harness.state(), LifecycleState::Closed);
}

#[tokio::test]
async fn launch_replaces_an_app_that_died_while_ready() {
    let tmp = tempfile::tempdir().unwrap();
    let app = write_fake_app(tmp.path(), FakeApp::Sleeper);
    let browser = FakeBrowser::builder().target(FakeTarget::page("main", "ctx")).start().await;
    let (mut harness, registry) = new_harness(config(&app, browser.port()));

    harness.launch().await.unwrap();
    let first_pid = harness.pid().unwrap() as i32;
    // SAFETY: killing the fake app this harness spawned.
    unsafe { libc::kill(first_pid, libc::SIGKILL) };

    // Reaped by the monitor once the pid is gone.
    let start = Instant::now();
    while pid_is_alive(first_pid) {
        assert!(start.elapsed() < Duration::from_secs(3), "app {first_pid} survived SIGKILL");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    harness.launch().await.unwrap();
    assert_eq!(harness.state(), LifecycleState::Ready);
    assert_ne!(harness.pid().unwrap() as i32, first_pid);
    assert_eq!(registry.len(), 1);

    harness.close().await;
    assert!(registry.is_empty());
}

#[tokio::test]
async fn app_sees_debug_variables_for_its_port() {
    let tmp = tempfile::tempdir().unwrap();
    let app = write_fake_app(tmp.path(), FakeApp::Sleeper);
    let envfile = tmp.path().join("app.env");
    let browser = FakeBrowser::builder().target(FakeTarget::page("main", "ctx")).start().await;
    let config = config(&app, browser.port())
        .with_env("FAKE_APP_ENVFILE", envfile.to_string_lossy());

    let (mut harness, _) = new_harness(config);
    harness.launch().await.unwrap();
    let env = read_when_written(&envfile).await;
    harness.close().await;

    assert!(
        env.contains(&format!("WEBKIT_INSPECTOR_SERVER=127.0.0.1:{}", browser.port())),
        "{env}"
    );
    assert!(env.contains("WEBKIT_DISABLE_DMABUF_RENDERER=1"));
    // The parent environment is inherited.
    assert!(env.contains("PATH="));
}

#[tokio::test]
async fn launch_app_returns_a_ready_harness() {
    let tmp = tempfile::tempdir().unwrap();
    let app = write_fake_app(tmp.path(), FakeApp::Sleeper);
    let browser = FakeBrowser::builder().target(FakeTarget::page("main", "ctx")).start().await;

    let (mut harness, session) = launch_app(config(&app, browser.port())).await.unwrap();
    assert_eq!(harness.state(), LifecycleState::Ready);
    assert_eq!(session.page().target_id, "main");
    harness.close().await;
}

/// Reports one context that has no pages.
struct EmptyContextAutomation;

struct EmptyContextConnection;

#[async_trait]
impl Automation for EmptyContextAutomation {
    fn name(&self) -> &str {
        "empty-context"
    }

    async fn connect(&self, _endpoint: &str) -> HarnessResult<Arc<dyn AutomationConnection>> {
        Ok(Arc::new(EmptyContextConnection))
    }
}

#[async_trait]
impl AutomationConnection for EmptyContextConnection {
    async fn contexts(&self) -> HarnessResult<Vec<BrowsingContext>> {
        Ok(vec![BrowsingContext {
            id: Some("ctx".to_string()),
            pages: Vec::new(),
        }])
    }

    async fn attach(&self, _page: &PageInfo) -> HarnessResult<String> {
        unreachable!("no page to attach to")
    }

    async fn evaluate(&self, _: &str, _: &str, _: bool) -> HarnessResult<Value> {
        unreachable!("never attached")
    }

    async fn close(&self) -> HarnessResult<()> {
        Err(HarnessError::Connection("close always fails".to_string()))
    }
}

#[tokio::test]
async fn context_without_pages_is_a_connection_error() {
    let tmp = tempfile::tempdir().unwrap();
    let app: PathBuf = write_fake_app(tmp.path(), FakeApp::Sleeper);
    let browser = FakeBrowser::builder().start().await;
    let registry = Arc::new(ShutdownRegistry::default());
    let mut harness =
        AppProcessHarness::with_automation(config(&app, browser.port()), Arc::new(EmptyContextAutomation))
            .unwrap()
            .with_registry(Arc::clone(&registry));

    let err = harness.launch().await.unwrap_err();
    assert!(matches!(err, HarnessError::Connection(ref m) if m.contains("no pages")), "{err}");
    // The failing connection close is swallowed and the app still stops.
    assert_eq!(harness.state(), LifecycleState::Closed);
    assert!(registry.is_empty());
}
