//! Harness configuration.

use std::path::Path;
use std::time::Duration;

use crate::error::HarnessResult;
use crate::platform::{self, BinaryLocation, DebugEnv, Platform, WebviewFamily};

/// Everything a harness needs to launch one app instance.
///
/// `debug_port` is shared between the app and the automation client. Only
/// one harness may be active on a given port; concurrent harnesses need
/// distinct ports.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub binary: BinaryLocation,
    pub debug_port: u16,
    pub startup_timeout: Duration,
    pub poll_interval: Duration,
    /// Time between the graceful and the forceful termination signal.
    pub grace_period: Duration,
    pub debug_env: DebugEnv,
    /// Additional variables passed to the app on top of the inherited
    /// environment and the debug variables.
    pub extra_env: Vec<(String, String)>,
}

impl HarnessConfig {
    pub const DEFAULT_DEBUG_PORT: u16 = 9222;
    pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_millis(5000);
    pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
    pub const GRACE_PERIOD: Duration = Duration::from_millis(1000);

    pub fn new(binary: impl Into<BinaryLocation>) -> Self {
        Self {
            binary: binary.into(),
            debug_port: Self::DEFAULT_DEBUG_PORT,
            startup_timeout: Self::DEFAULT_STARTUP_TIMEOUT,
            poll_interval: Self::POLL_INTERVAL,
            grace_period: Self::GRACE_PERIOD,
            debug_env: DebugEnv::default(),
            extra_env: Vec::new(),
        }
    }

    /// Config for the debug build of `app_name` inside a desktop project,
    /// laid out for the current host.
    pub fn for_project(project_root: &Path, app_name: &str) -> HarnessResult<Self> {
        let target_dir = platform::debug_target_dir(project_root);
        let binary = platform::resolve_binary_path(Platform::current()?, &target_dir, app_name);
        Ok(Self::new(binary))
    }

    pub fn with_debug_port(mut self, port: u16) -> Self {
        self.debug_port = port;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn with_debug_env(mut self, debug_env: DebugEnv) -> Self {
        self.debug_env = debug_env;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_env.push((key.into(), value.into()));
        self
    }

    /// Base URL of the automation endpoint.
    pub fn endpoint(&self) -> String {
        format!("http://127.0.0.1:{}", self.debug_port)
    }

    /// URL polled for readiness.
    pub fn version_url(&self) -> String {
        format!("{}/json/version", self.endpoint())
    }

    /// Variables added to the inherited environment of the app.
    pub fn launch_env(&self, family: WebviewFamily) -> Vec<(String, String)> {
        let mut env = self.debug_env.render(family, self.debug_port);
        env.extend(self.extra_env.iter().cloned());
        env
    }
}
