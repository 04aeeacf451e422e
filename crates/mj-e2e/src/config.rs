//! Project configuration for the e2e runner.
//!
//! Provides an optional TOML file at `<project>/mj-e2e.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use mj_harness::driver::{self, DriverConfig};
use mj_harness::platform::{self, BinaryLocation, DebugEnv, EnvTemplate, Platform};
use mj_harness::{BuildStep, HarnessConfig};

pub const CONFIG_FILE_NAME: &str = "mj-e2e.toml";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub app: AppSection,
    pub debug: DebugSection,
    pub build: BuildSection,
    pub driver: DriverSection,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// Binary name produced by the desktop build.
    pub name: String,
    /// Build output directory, relative to the project root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_dir: Option<String>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: platform::DEFAULT_APP_NAME.to_string(),
            target_dir: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSection {
    pub port: u16,
    pub startup_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub grace_period_ms: u64,
    /// Replaces the variables set on every platform when non-empty.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub common_env: BTreeMap<String, String>,
    /// Replaces the WebKit (macOS, Linux) variables when non-empty.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub webkit_env: BTreeMap<String, String>,
    /// Replaces the WebView2 (Windows) variables when non-empty.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub webview2_env: BTreeMap<String, String>,
}

impl Default for DebugSection {
    fn default() -> Self {
        Self {
            port: HarnessConfig::DEFAULT_DEBUG_PORT,
            startup_timeout_ms: HarnessConfig::DEFAULT_STARTUP_TIMEOUT.as_millis() as u64,
            poll_interval_ms: HarnessConfig::POLL_INTERVAL.as_millis() as u64,
            grace_period_ms: HarnessConfig::GRACE_PERIOD.as_millis() as u64,
            common_env: BTreeMap::new(),
            webkit_env: BTreeMap::new(),
            webview2_env: BTreeMap::new(),
        }
    }
}

impl DebugSection {
    fn debug_env(&self) -> DebugEnv {
        fn templates(table: &BTreeMap<String, String>) -> Vec<EnvTemplate> {
            table.iter().map(|(k, v)| EnvTemplate::new(k, v)).collect()
        }

        let mut env = DebugEnv::default();
        if !self.common_env.is_empty() {
            env.common = templates(&self.common_env);
        }
        if !self.webkit_env.is_empty() {
            env.webkit = templates(&self.webkit_env);
        }
        if !self.webview2_env.is_empty() {
            env.webview2 = templates(&self.webview2_env);
        }
        env
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSection {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for BuildSection {
    fn default() -> Self {
        let step = BuildStep::new(".");
        Self {
            program: step.program,
            args: step.args,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSection {
    /// Driver executable; `~` expands to the home directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
    pub port: u16,
    pub startup_ms: u64,
}

impl Default for DriverSection {
    fn default() -> Self {
        let defaults = DriverConfig::default();
        Self {
            binary: None,
            port: defaults.port,
            startup_ms: defaults.startup_timeout.as_millis() as u64,
        }
    }
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

pub fn config_path(project_root: &Path) -> PathBuf {
    project_root.join(CONFIG_FILE_NAME)
}

/// Load the config file. A missing file is `None`; a malformed one is an
/// error.
pub fn load_config(project_root: &Path) -> Result<Option<ConfigFile>> {
    let path = config_path(project_root);
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(Some(config))
}

pub fn save_config(project_root: &Path, config: &ConfigFile) -> Result<PathBuf> {
    let path = config_path(project_root);
    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(path)
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Flags that override file and environment settings.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub debug_port: Option<u16>,
    pub startup_timeout_ms: Option<u64>,
    pub driver_port: Option<u16>,
}

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct ResolvedConfig {
    pub project_root: PathBuf,
    pub harness: HarnessConfig,
    pub build: BuildStep,
    pub driver: DriverConfig,
}

impl ResolvedConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - Debug port: `--port` > `MJ_DEBUG_PORT` > `debug.port` > 9222
    /// - Startup timeout: `--timeout-ms` > `MJ_STARTUP_TIMEOUT_MS` > `debug.startup_timeout_ms` > 5000
    /// - App binary: `MJ_APP_BINARY` > layout under `app.target_dir` for the host platform
    pub fn resolve(project_root: &Path, overrides: &Overrides) -> Result<Self> {
        let file = load_config(project_root)?.unwrap_or_default();

        let debug_port = match overrides.debug_port {
            Some(port) => port,
            None => env_parse("MJ_DEBUG_PORT")?.unwrap_or(file.debug.port),
        };
        let startup_timeout_ms = match overrides.startup_timeout_ms {
            Some(ms) => ms,
            None => env_parse("MJ_STARTUP_TIMEOUT_MS")?.unwrap_or(file.debug.startup_timeout_ms),
        };

        let binary = match std::env::var("MJ_APP_BINARY") {
            Ok(path) if !path.is_empty() => BinaryLocation::exact(path),
            _ => {
                let target_dir = match &file.app.target_dir {
                    Some(dir) => project_root.join(dir),
                    None => platform::debug_target_dir(project_root),
                };
                platform::resolve_binary_path(Platform::current()?, &target_dir, &file.app.name)
            }
        };

        let mut harness = HarnessConfig::new(binary)
            .with_debug_port(debug_port)
            .with_startup_timeout(Duration::from_millis(startup_timeout_ms))
            .with_grace_period(Duration::from_millis(file.debug.grace_period_ms))
            .with_debug_env(file.debug.debug_env());
        harness.poll_interval = Duration::from_millis(file.debug.poll_interval_ms.max(1));

        let build = BuildStep::new(project_root).with_command(file.build.program, file.build.args);

        let driver = DriverConfig {
            binary: file
                .driver
                .binary
                .as_deref()
                .map(expand_home)
                .unwrap_or_else(driver::default_driver_binary),
            port: overrides.driver_port.unwrap_or(file.driver.port),
            startup_timeout: Duration::from_millis(file.driver.startup_ms),
            ..DriverConfig::default()
        };

        debug!(
            project = %project_root.display(),
            port = harness.debug_port,
            startup_timeout_ms,
            binary = %harness.binary.primary.display(),
            "resolved configuration"
        );

        Ok(Self {
            project_root: project_root.to_path_buf(),
            harness,
            build,
            driver,
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => value
            .parse()
            .map(Some)
            .with_context(|| format!("invalid {name}: {value:?}")),
        _ => Ok(None),
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
