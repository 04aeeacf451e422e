//! One request type per backend command.
//!
//! Arguments serialize with camelCase keys, which is how the webview side
//! of the IPC layer names them. Absent optionals are omitted entirely so
//! the backend sees them as `None`.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::BridgeError;
use crate::models::{Bookmark, Commit};

/// A backend command with a statically known name and response type.
pub trait BridgeCommand: Serialize + Send + Sync {
    /// Name the backend registers the command handler under.
    const NAME: &'static str;

    /// Shape of a successful response.
    type Response: DeserializeOwned;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<String>,
}

impl BridgeCommand for RepoStatus {
    const NAME: &'static str = "jj_status";
    type Response = String;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoInit {
    pub path: String,
}

impl BridgeCommand for RepoInit {
    const NAME: &'static str = "jj_init";
    type Response = String;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoDiff {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

impl BridgeCommand for RepoDiff {
    const NAME: &'static str = "jj_diff";
    type Response = String;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryLog {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl BridgeCommand for HistoryLog {
    const NAME: &'static str = "jj_log";
    type Response = Vec<Commit>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNew {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BridgeCommand for ChangeNew {
    const NAME: &'static str = "jj_new";
    type Response = String;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDescribe {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_id: Option<String>,
}

impl BridgeCommand for ChangeDescribe {
    const NAME: &'static str = "jj_describe";
    type Response = String;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkList {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<String>,
}

impl BridgeCommand for BookmarkList {
    const NAME: &'static str = "jj_bookmark_list";
    type Response = Vec<Bookmark>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkCreate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

impl BridgeCommand for BookmarkCreate {
    const NAME: &'static str = "jj_bookmark_create";
    type Response = String;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkTrack {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<String>,
    pub name: String,
}

impl BridgeCommand for BookmarkTrack {
    const NAME: &'static str = "jj_bookmark_track";
    type Response = String;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkDelete {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<String>,
    pub name: String,
}

impl BridgeCommand for BookmarkDelete {
    const NAME: &'static str = "jj_bookmark_delete";
    type Response = String;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFetch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
}

impl BridgeCommand for RemoteFetch {
    const NAME: &'static str = "jj_git_fetch";
    type Response = String;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePush {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bookmark: Option<String>,
}

impl BridgeCommand for RemotePush {
    const NAME: &'static str = "jj_git_push";
    type Response = String;
}

/// The closed set of backend commands, for callers that pick a command at
/// runtime (e.g. from a CLI argument).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    RepoStatus(RepoStatus),
    RepoInit(RepoInit),
    RepoDiff(RepoDiff),
    HistoryLog(HistoryLog),
    ChangeNew(ChangeNew),
    ChangeDescribe(ChangeDescribe),
    BookmarkList(BookmarkList),
    BookmarkCreate(BookmarkCreate),
    BookmarkTrack(BookmarkTrack),
    BookmarkDelete(BookmarkDelete),
    RemoteFetch(RemoteFetch),
    RemotePush(RemotePush),
}

fn encode<C: BridgeCommand>(command: &C) -> Result<serde_json::Value, BridgeError> {
    serde_json::to_value(command).map_err(|source| BridgeError::Encode {
        command: C::NAME.to_string(),
        source,
    })
}

impl Command {
    /// Backend name of the wrapped command.
    pub fn name(&self) -> &'static str {
        match self {
            Command::RepoStatus(_) => RepoStatus::NAME,
            Command::RepoInit(_) => RepoInit::NAME,
            Command::RepoDiff(_) => RepoDiff::NAME,
            Command::HistoryLog(_) => HistoryLog::NAME,
            Command::ChangeNew(_) => ChangeNew::NAME,
            Command::ChangeDescribe(_) => ChangeDescribe::NAME,
            Command::BookmarkList(_) => BookmarkList::NAME,
            Command::BookmarkCreate(_) => BookmarkCreate::NAME,
            Command::BookmarkTrack(_) => BookmarkTrack::NAME,
            Command::BookmarkDelete(_) => BookmarkDelete::NAME,
            Command::RemoteFetch(_) => RemoteFetch::NAME,
            Command::RemotePush(_) => RemotePush::NAME,
        }
    }

    /// Invoke arguments as a JSON object.
    pub fn args(&self) -> Result<serde_json::Value, BridgeError> {
        match self {
            Command::RepoStatus(c) => encode(c),
            Command::RepoInit(c) => encode(c),
            Command::RepoDiff(c) => encode(c),
            Command::HistoryLog(c) => encode(c),
            Command::ChangeNew(c) => encode(c),
            Command::ChangeDescribe(c) => encode(c),
            Command::BookmarkList(c) => encode(c),
            Command::BookmarkCreate(c) => encode(c),
            Command::BookmarkTrack(c) => encode(c),
            Command::BookmarkDelete(c) => encode(c),
            Command::RemoteFetch(c) => encode(c),
            Command::RemotePush(c) => encode(c),
        }
    }
}

macro_rules! impl_from_request {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Command {
                fn from(request: $variant) -> Self {
                    Command::$variant(request)
                }
            }
        )*
    };
}

impl_from_request!(
    RepoStatus,
    RepoInit,
    RepoDiff,
    HistoryLog,
    ChangeNew,
    ChangeDescribe,
    BookmarkList,
    BookmarkCreate,
    BookmarkTrack,
    BookmarkDelete,
    RemoteFetch,
    RemotePush,
);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_optionals_are_omitted() {
        let args = Command::from(RepoStatus::default()).args().unwrap();
        assert_eq!(args, json!({}));
    }

    #[test]
    fn arguments_use_camel_case_keys() {
        let describe = ChangeDescribe {
            repo_path: Some("/tmp/repo".to_string()),
            message: "fix parser".to_string(),
            change_id: Some("qpvuntsm".to_string()),
        };
        let args = Command::from(describe).args().unwrap();
        assert_eq!(
            args,
            json!({"repoPath": "/tmp/repo", "message": "fix parser", "changeId": "qpvuntsm"})
        );
    }

    #[test]
    fn required_fields_are_always_present() {
        let track = BookmarkTrack {
            repo_path: None,
            name: "main@origin".to_string(),
        };
        assert_eq!(Command::from(track).args().unwrap(), json!({"name": "main@origin"}));
    }

    #[test]
    fn log_limit_serializes_as_number() {
        let log = HistoryLog {
            repo_path: None,
            limit: Some(20),
        };
        assert_eq!(Command::from(log).args().unwrap(), json!({"limit": 20}));
    }

    #[test]
    fn every_variant_maps_to_a_distinct_backend_name() {
        let commands: Vec<Command> = vec![
            RepoStatus::default().into(),
            RepoInit { path: ".".into() }.into(),
            RepoDiff::default().into(),
            HistoryLog::default().into(),
            ChangeNew::default().into(),
            ChangeDescribe {
                repo_path: None,
                message: "m".into(),
                change_id: None,
            }
            .into(),
            BookmarkList::default().into(),
            BookmarkCreate {
                repo_path: None,
                name: "b".into(),
                revision: None,
            }
            .into(),
            BookmarkTrack {
                repo_path: None,
                name: "b".into(),
            }
            .into(),
            BookmarkDelete {
                repo_path: None,
                name: "b".into(),
            }
            .into(),
            RemoteFetch::default().into(),
            RemotePush::default().into(),
        ];

        let mut names: Vec<&str> = commands.iter().map(Command::name).collect();
        assert!(names.iter().all(|n| n.starts_with("jj_")));
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 12);
    }
}
