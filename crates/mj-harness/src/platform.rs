//! Host platform detection, binary layout and debug-enablement variables.
//!
//! Resolution is a pure function of the platform and the build-output
//! directory. Whether the binary actually exists is only checked when the
//! harness is about to spawn it ([`BinaryLocation::locate`]).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};

/// Name of the app binary produced by the desktop build.
pub const DEFAULT_APP_NAME: &str = "mighty-jujutsu";

/// Supported host operating systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOs,
    Linux,
    Windows,
}

/// Webview engine the app embeds on a platform. Each family has its own
/// way of turning on remote debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebviewFamily {
    WebKit,
    WebView2,
}

impl Platform {
    /// Platform of the running process.
    pub fn current() -> HarnessResult<Self> {
        Self::from_os(std::env::consts::OS)
    }

    /// Parse an OS identifier. Accepts both Rust (`macos`, `windows`) and
    /// Node-style (`darwin`, `win32`) names.
    pub fn from_os(os: &str) -> HarnessResult<Self> {
        match os {
            "macos" | "darwin" => Ok(Platform::MacOs),
            "linux" => Ok(Platform::Linux),
            "windows" | "win32" => Ok(Platform::Windows),
            other => Err(HarnessError::Configuration(format!(
                "unsupported platform: {other}"
            ))),
        }
    }

    pub fn family(self) -> WebviewFamily {
        match self {
            Platform::MacOs | Platform::Linux => WebviewFamily::WebKit,
            Platform::Windows => WebviewFamily::WebView2,
        }
    }
}

/// Where the binary is expected, plus an alternative to try if the
/// preferred layout is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryLocation {
    pub primary: PathBuf,
    pub fallback: Option<PathBuf>,
}

impl BinaryLocation {
    /// A single explicit path with no fallback.
    pub fn exact(path: impl Into<PathBuf>) -> Self {
        Self {
            primary: path.into(),
            fallback: None,
        }
    }

    /// Return the first candidate that exists on disk.
    pub fn locate(&self) -> HarnessResult<PathBuf> {
        if self.primary.exists() {
            return Ok(self.primary.clone());
        }
        if let Some(fallback) = self.fallback.as_ref().filter(|p| p.exists()) {
            return Ok(fallback.clone());
        }

        let mut message = format!("app binary not found at {}", self.primary.display());
        if let Some(fallback) = &self.fallback {
            message.push_str(&format!(" or {}", fallback.display()));
        }
        Err(HarnessError::Configuration(message))
    }
}

impl From<PathBuf> for BinaryLocation {
    fn from(path: PathBuf) -> Self {
        Self::exact(path)
    }
}

/// Debug build output directory of the desktop project.
pub fn debug_target_dir(project_root: &Path) -> PathBuf {
    project_root.join("src-tauri").join("target").join("debug")
}

/// Expected binary layout for `platform` under `target_dir`.
///
/// macOS prefers the `.app` bundle and falls back to the flat executable
/// that a plain `cargo build` leaves behind.
pub fn resolve_binary_path(platform: Platform, target_dir: &Path, app_name: &str) -> BinaryLocation {
    match platform {
        Platform::MacOs => BinaryLocation {
            primary: target_dir
                .join(format!("{app_name}.app"))
                .join("Contents")
                .join("MacOS")
                .join(app_name),
            fallback: Some(target_dir.join(app_name)),
        },
        Platform::Linux => BinaryLocation::exact(target_dir.join(app_name)),
        Platform::Windows => BinaryLocation::exact(target_dir.join(format!("{app_name}.exe"))),
    }
}

/// [`resolve_binary_path`] for an OS identifier string.
pub fn resolve_for_os(os: &str, target_dir: &Path, app_name: &str) -> HarnessResult<BinaryLocation> {
    Ok(resolve_binary_path(Platform::from_os(os)?, target_dir, app_name))
}

/// One environment variable whose value may contain a `{port}` placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvTemplate {
    pub name: String,
    pub value: String,
}

impl EnvTemplate {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    fn render(&self, port: u16) -> (String, String) {
        (self.name.clone(), self.value.replace("{port}", &port.to_string()))
    }
}

/// Variables that switch on the webview's remote debugging.
///
/// The names are whatever the webview runtimes currently honour, so they
/// are kept as data and can be overridden from the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugEnv {
    /// Set on every platform.
    #[serde(default)]
    pub common: Vec<EnvTemplate>,
    #[serde(default)]
    pub webkit: Vec<EnvTemplate>,
    #[serde(default)]
    pub webview2: Vec<EnvTemplate>,
}

impl Default for DebugEnv {
    fn default() -> Self {
        Self {
            common: vec![EnvTemplate::new("WEBKIT_DISABLE_DMABUF_RENDERER", "1")],
            webkit: vec![EnvTemplate::new("WEBKIT_INSPECTOR_SERVER", "127.0.0.1:{port}")],
            webview2: vec![EnvTemplate::new(
                "WEBVIEW2_ADDITIONAL_BROWSER_ARGUMENTS",
                "--remote-debugging-port={port}",
            )],
        }
    }
}

impl DebugEnv {
    /// Concrete variables for `family`, all pointing at `port`.
    pub fn render(&self, family: WebviewFamily, port: u16) -> Vec<(String, String)> {
        let specific = match family {
            WebviewFamily::WebKit => &self.webkit,
            WebviewFamily::WebView2 => &self.webview2,
        };
        self.common
            .iter()
            .chain(specific)
            .map(|t| t.render(port))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_supported_os_resolves_under_target_dir() {
        let target = Path::new("/work/src-tauri/target/debug");
        for os in ["macos", "darwin", "linux", "windows", "win32"] {
            let location = resolve_for_os(os, target, DEFAULT_APP_NAME).unwrap();
            assert!(location.primary.starts_with(target), "{os}: {:?}", location.primary);
            assert!(!location.primary.as_os_str().is_empty());
        }
    }

    #[test]
    fn resolution_is_deterministic() {
        let target = Path::new("/t");
        assert_eq!(
            resolve_for_os("linux", target, "app").unwrap(),
            resolve_for_os("linux", target, "app").unwrap()
        );
    }

    #[test]
    fn unknown_os_is_a_configuration_error() {
        let err = resolve_for_os("haiku", Path::new("/t"), "app").unwrap_err();
        assert!(matches!(err, HarnessError::Configuration(ref m) if m.contains("haiku")));
    }

    #[test]
    fn platform_layouts() {
        let target = Path::new("/t");
        let mac = resolve_binary_path(Platform::MacOs, target, "app");
        assert_eq!(mac.primary, PathBuf::from("/t/app.app/Contents/MacOS/app"));
        assert_eq!(mac.fallback, Some(PathBuf::from("/t/app")));

        let linux = resolve_binary_path(Platform::Linux, target, "app");
        assert_eq!(linux.primary, PathBuf::from("/t/app"));
        assert_eq!(linux.fallback, None);

        let windows = resolve_binary_path(Platform::Windows, target, "app");
        assert_eq!(windows.primary, PathBuf::from("/t/app.exe"));
    }

    #[test]
    fn locate_prefers_bundle_then_falls_back() {
        let tmp = tempfile::tempdir().unwrap();
        let location = resolve_binary_path(Platform::MacOs, tmp.path(), "app");

        assert!(matches!(location.locate(), Err(HarnessError::Configuration(_))));

        std::fs::write(tmp.path().join("app"), "").unwrap();
        assert_eq!(location.locate().unwrap(), tmp.path().join("app"));

        let bundle = location.primary.clone();
        std::fs::create_dir_all(bundle.parent().unwrap()).unwrap();
        std::fs::write(&bundle, "").unwrap();
        assert_eq!(location.locate().unwrap(), bundle);
    }

    #[test]
    fn missing_binary_error_names_both_candidates() {
        let location = resolve_binary_path(Platform::MacOs, Path::new("/nonexistent"), "app");
        let msg = location.locate().unwrap_err().to_string();
        assert!(msg.contains("app.app"), "{msg}");
        assert!(msg.contains("/nonexistent/app"), "{msg}");
    }

    #[test]
    fn debug_env_encodes_port_per_family() {
        let env = DebugEnv::default();

        let webkit = env.render(WebviewFamily::WebKit, 9333);
        assert!(webkit.contains(&(
            "WEBKIT_INSPECTOR_SERVER".to_string(),
            "127.0.0.1:9333".to_string()
        )));
        assert!(webkit.iter().all(|(k, _)| k != "WEBVIEW2_ADDITIONAL_BROWSER_ARGUMENTS"));

        let webview2 = env.render(WebviewFamily::WebView2, 9333);
        assert!(webview2.contains(&(
            "WEBVIEW2_ADDITIONAL_BROWSER_ARGUMENTS".to_string(),
            "--remote-debugging-port=9333".to_string()
        )));

        // The DMA-BUF switch is part of the common set, on every family.
        let dmabuf = ("WEBKIT_DISABLE_DMABUF_RENDERER".to_string(), "1".to_string());
        assert!(webkit.contains(&dmabuf));
        assert!(webview2.contains(&dmabuf));
        assert!(webview2.iter().all(|(k, _)| k != "WEBKIT_INSPECTOR_SERVER"));
    }

    #[test]
    fn platform_family_mapping() {
        assert_eq!(Platform::MacOs.family(), WebviewFamily::WebKit);
        assert_eq!(Platform::Linux.family(), WebviewFamily::WebKit);
        assert_eq!(Platform::Windows.family(), WebviewFamily::WebView2);
    }
}
