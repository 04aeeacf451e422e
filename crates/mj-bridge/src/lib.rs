//! Typed command bridge for the mighty-jujutsu backend.
//!
//! The desktop app registers a fixed set of backend commands that the
//! frontend reaches through a generic invoke-by-name primitive. This crate
//! closes that set: every command is a request struct implementing
//! [`BridgeCommand`], carrying its backend name and response type, and is
//! dispatched through the single [`CommandBridge`] seam.
//!
//! ```text
//! RepoStatus { repo_path } --invoke()--> CommandBridge::invoke_raw("jj_status", {...})
//!                                               |
//!                                               v
//!                                     serde_json::Value --> String
//! ```

pub mod bridge;
pub mod command;
pub mod error;
pub mod models;

pub use bridge::{CommandBridge, invoke, invoke_command};
pub use command::{
    BookmarkCreate, BookmarkDelete, BookmarkList, BookmarkTrack, BridgeCommand, ChangeDescribe,
    ChangeNew, Command, HistoryLog, RemoteFetch, RemotePush, RepoDiff, RepoInit, RepoStatus,
};
pub use error::BridgeError;
pub use models::{Author, Bookmark, Commit};
