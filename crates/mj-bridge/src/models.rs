//! Response shapes returned by the backend.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
    pub timestamp: String,
}

/// One entry of `jj log`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub change_id: String,
    pub commit_id: String,
    pub author: Author,
    pub committer: Author,
    pub description: String,
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub is_working_copy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub name: String,
    pub target: String,
    pub is_tracking: bool,
    /// `None` for local bookmarks.
    pub remote: Option<String>,
}
