//! The `CommandBridge` trait -- the single dispatch seam to the backend.
//!
//! Implementors only move a command name and a JSON argument object to the
//! backend and return its JSON answer. Typing happens on top of that in
//! [`invoke`], so the trait stays object-safe and can be held as
//! `&dyn CommandBridge`.

use async_trait::async_trait;
use serde_json::Value;

use crate::command::{BridgeCommand, Command};
use crate::error::BridgeError;

#[async_trait]
pub trait CommandBridge: Send + Sync {
    /// Send `name` with `args` to the backend and return the raw response.
    ///
    /// A backend rejection must surface as [`BridgeError::Rejected`].
    async fn invoke_raw(&self, name: &str, args: Value) -> Result<Value, BridgeError>;
}

/// Dispatch a typed command and decode its response.
pub async fn invoke<C>(
    bridge: &(impl CommandBridge + ?Sized),
    command: &C,
) -> Result<C::Response, BridgeError>
where
    C: BridgeCommand,
{
    let args = serde_json::to_value(command).map_err(|source| BridgeError::Encode {
        command: C::NAME.to_string(),
        source,
    })?;
    let raw = bridge.invoke_raw(C::NAME, args).await?;
    serde_json::from_value(raw).map_err(|source| BridgeError::Decode {
        command: C::NAME.to_string(),
        source,
    })
}

/// Dispatch a runtime-selected command, returning the undecoded response.
pub async fn invoke_command(
    bridge: &(impl CommandBridge + ?Sized),
    command: &Command,
) -> Result<Value, BridgeError> {
    let args = command.args()?;
    bridge.invoke_raw(command.name(), args).await
}

// Compile-time assertion: CommandBridge must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn CommandBridge) {}
};
