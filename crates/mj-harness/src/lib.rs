//! Process and automation harness for end-to-end tests of the
//! mighty-jujutsu desktop app.
//!
//! [`AppProcessHarness`] launches a built app binary with remote debugging
//! switched on, waits for the debug endpoint, attaches a CDP client and
//! hands out an [`AutomationSession`]. The session drives the page and
//! doubles as a [`mj_bridge::CommandBridge`] into the app's backend.

pub mod automation;
pub mod build;
pub mod config;
pub mod driver;
pub mod error;
pub mod harness;
pub mod platform;
pub mod probe;
pub mod process;
pub mod session;
pub mod shutdown;

pub use automation::{Automation, AutomationConnection, BrowsingContext, CdpAutomation, PageInfo};
pub use build::BuildStep;
pub use config::HarnessConfig;
pub use driver::{DriverConfig, DriverService};
pub use error::{HarnessError, HarnessResult};
pub use harness::{AppProcessHarness, LifecycleState, launch_app};
pub use platform::{BinaryLocation, DebugEnv, EnvTemplate, Platform, WebviewFamily};
pub use process::{AppProcess, ProcessExit};
pub use session::AutomationSession;
pub use shutdown::{ShutdownRegistry, install_signal_handlers};
