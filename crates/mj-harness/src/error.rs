use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the harness and its collaborators.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Static setup is wrong: unknown platform, missing binary, bad config.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The OS refused to start the process.
    #[error("failed to spawn {}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The debug endpoint never answered with a 2xx within the budget.
    #[error(
        "app did not start within {timeout_ms}ms (binary: {path}{note}); \
         make sure the app is built and the binary path is correct",
        path = .binary.display(),
        note = exit_note(.exit)
    )]
    StartupTimeout {
        timeout_ms: u64,
        binary: PathBuf,
        /// Set when the process died before the endpoint came up.
        exit: Option<String>,
    },

    /// The automation layer could not attach to a usable page.
    #[error("automation connection failed: {0}")]
    Connection(String),

    /// A session was requested before a successful launch.
    #[error("app is not running; call launch() first")]
    NotRunning,

    /// The automation peer answered with an error or an unreadable message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Script evaluated in the page threw.
    #[error("script threw: {0}")]
    ScriptException(String),

    /// The pre-test build step failed.
    #[error("build failed: {0}")]
    Build(String),

    /// A WebDriver request failed.
    #[error("webdriver error: {0}")]
    Driver(String),

    /// The driver process exited while it was expected to be running.
    #[error("driver exited unexpectedly: {0}")]
    DriverExited(String),
}

fn exit_note(exit: &Option<String>) -> String {
    match exit {
        Some(status) => format!(", process already exited: {status}"),
        None => String::new(),
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;
