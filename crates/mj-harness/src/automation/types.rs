//! Data shapes shared by automation backends, plus the CDP wire messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `GET /json/version`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    #[serde(rename = "Browser", default)]
    pub browser: Option<String>,
    pub web_socket_debugger_url: String,
}

/// One page or window the automation client can drive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub target_id: String,
    pub kind: String,
    pub url: String,
    pub title: String,
}

/// A group of pages sharing one browser context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowsingContext {
    /// `None` for targets that report no context id.
    pub id: Option<String>,
    pub pages: Vec<PageInfo>,
}

/// Entry of `Target.getTargets`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TargetInfo {
    pub target_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub browser_context_id: Option<String>,
}

impl TargetInfo {
    pub fn is_page(&self) -> bool {
        matches!(self.kind.as_str(), "page" | "webview")
    }
}

impl From<TargetInfo> for PageInfo {
    fn from(target: TargetInfo) -> Self {
        Self {
            target_id: target.target_id,
            kind: target.kind,
            url: target.url,
            title: target.title,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CdpRequest<'a> {
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<&'a str>,
}

/// Any inbound frame. Events carry `method` and no `id`.
#[derive(Debug, Deserialize)]
pub(crate) struct CdpMessage {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<CdpError>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CdpError {
    pub code: i64,
    pub message: String,
}

/// Group targets into browser contexts, keeping first-seen order of both
/// contexts and pages. Non-page targets are dropped.
pub(crate) fn group_contexts(targets: Vec<TargetInfo>) -> Vec<BrowsingContext> {
    let mut contexts: Vec<BrowsingContext> = Vec::new();
    for target in targets.into_iter().filter(TargetInfo::is_page) {
        let id = target.browser_context_id.clone();
        match contexts.iter_mut().find(|c| c.id == id) {
            Some(context) => context.pages.push(target.into()),
            None => contexts.push(BrowsingContext {
                id,
                pages: vec![target.into()],
            }),
        }
    }
    contexts
}

/// Message of a `Runtime.evaluate` exception, if the result carries one.
///
/// Prefers the thrown value, then the exception description, then the
/// summary text.
pub(crate) fn exception_message(result: &Value) -> Option<String> {
    let details = result.get("exceptionDetails")?;
    let exception = details.get("exception");

    let thrown = exception.and_then(|e| e.get("value")).and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    });
    let description = exception
        .and_then(|e| e.get("description"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let text = details.get("text").and_then(Value::as_str).map(str::to_string);

    Some(
        thrown
            .or(description)
            .or(text)
            .unwrap_or_else(|| "unknown exception".to_string()),
    )
}
