//! The pre-test debug build of the desktop app.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{error, info};

use crate::error::{HarnessError, HarnessResult};

pub const DEFAULT_BUILD_PROGRAM: &str = "pnpm";
pub const DEFAULT_BUILD_ARGS: &[&str] = &["tauri", "build", "--debug"];

/// One external build invocation, run from the project root with its
/// output streamed straight to the terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStep {
    pub project_root: PathBuf,
    pub program: String,
    pub args: Vec<String>,
}

impl BuildStep {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            program: DEFAULT_BUILD_PROGRAM.to_string(),
            args: DEFAULT_BUILD_ARGS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_command(mut self, program: impl Into<String>, args: Vec<String>) -> Self {
        self.program = program.into();
        self.args = args;
        self
    }

    /// Command line as typed by a user, for messages.
    pub fn display_command(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run the build to completion. Any spawn failure or non-zero exit is
    /// a [`HarnessError::Build`].
    pub async fn run(&self) -> HarnessResult<Duration> {
        let start = Instant::now();
        let command_line = self.display_command();
        info!(command = %command_line, cwd = %self.project_root.display(), "building app");

        let status = build_command(&self.program, &self.args, &self.project_root)
            .status()
            .await
            .map_err(|e| HarnessError::Build(format!("failed to run `{command_line}`: {e}")))?;

        if !status.success() {
            error!(command = %command_line, %status, "build failed");
            return Err(HarnessError::Build(format!("`{command_line}` exited with {status}")));
        }

        let elapsed = start.elapsed();
        info!(elapsed_ms = elapsed.as_millis() as u64, "build finished");
        Ok(elapsed)
    }
}

#[cfg(windows)]
fn build_command(program: &str, args: &[String], cwd: &Path) -> Command {
    // Package-manager shims on Windows are .cmd scripts.
    let mut command = Command::new("cmd");
    command.arg("/C").arg(program).args(args);
    configure(command, cwd)
}

#[cfg(not(windows))]
fn build_command(program: &str, args: &[String], cwd: &Path) -> Command {
    let mut command = Command::new(program);
    command.args(args);
    configure(command, cwd)
}

fn configure(mut command: Command, cwd: &Path) -> Command {
    command
        .current_dir(cwd)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    command
}
