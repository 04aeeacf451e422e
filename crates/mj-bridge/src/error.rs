use thiserror::Error;

/// Errors surfaced by a [`crate::CommandBridge`] dispatch.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The backend rejected the command; carries the backend's error string.
    #[error("{command} rejected: {message}")]
    Rejected { command: String, message: String },

    /// The request could not be encoded as invoke arguments.
    #[error("failed to encode arguments for {command}")]
    Encode {
        command: String,
        #[source]
        source: serde_json::Error,
    },

    /// The backend answered with a value of the wrong shape.
    #[error("unexpected response from {command}")]
    Decode {
        command: String,
        #[source]
        source: serde_json::Error,
    },

    /// The channel to the backend failed before a response arrived.
    #[error("bridge transport failed: {0}")]
    Transport(String),
}
