//! The `Automation` trait -- the seam between the harness and a browser
//! automation protocol.
//!
//! Both traits are object-safe so the harness can hold
//! `Arc<dyn Automation>` and `Arc<dyn AutomationConnection>`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::types::{BrowsingContext, PageInfo};
use crate::error::HarnessResult;

/// Factory for connections to a debug endpoint.
#[async_trait]
pub trait Automation: Send + Sync {
    /// Human-readable name (e.g. "cdp").
    fn name(&self) -> &str;

    /// Connect to the endpoint at `endpoint` (`http://host:port`).
    async fn connect(&self, endpoint: &str) -> HarnessResult<Arc<dyn AutomationConnection>>;
}

/// A live connection to the application's webview.
#[async_trait]
pub trait AutomationConnection: Send + Sync {
    /// Browser contexts with their pages, in discovery order.
    async fn contexts(&self) -> HarnessResult<Vec<BrowsingContext>>;

    /// Attach to `page`, returning the session id used for evaluation.
    async fn attach(&self, page: &PageInfo) -> HarnessResult<String>;

    /// Evaluate `expression` in an attached page and return its value.
    ///
    /// With `await_promise`, a returned promise is awaited first. A thrown
    /// exception becomes [`crate::HarnessError::ScriptException`].
    async fn evaluate(
        &self,
        session_id: &str,
        expression: &str,
        await_promise: bool,
    ) -> HarnessResult<Value>;

    /// Close the connection. Later calls on the connection fail.
    async fn close(&self) -> HarnessResult<()>;
}

// Compile-time assertion: both traits must be usable as trait objects.
const _: () = {
    fn _assert_object_safe(_: &dyn Automation, _: &dyn AutomationConnection) {}
};
