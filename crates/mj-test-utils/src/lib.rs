//! Shared test utilities for the harness integration tests.
//!
//! Nothing here needs a real webview:
//! - [`FakeBrowser`] serves `/json/version` and a scripted CDP WebSocket,
//!   optionally only after a delay or never.
//! - [`FakeWebDriver`] answers the handful of WebDriver routes the driver
//!   service uses.
//! - [`write_fake_app`] writes a shell script that stands in for the app
//!   binary (Unix only).

mod app;
mod browser;
mod webdriver;

#[cfg(unix)]
pub use app::{FakeApp, write_fake_app};
pub use browser::{FakeBrowser, FakeBrowserBuilder, FakeTarget};
pub use webdriver::FakeWebDriver;

/// A loopback port that was free a moment ago.
///
/// Nothing keeps it reserved, so use it right away. Good enough for
/// "nothing is listening here" tests.
pub fn unused_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("failed to reserve a loopback port")
}

async fn bind(port: u16) -> tokio::net::TcpListener {
    tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap_or_else(|e| panic!("failed to bind 127.0.0.1:{port}: {e}"))
}
