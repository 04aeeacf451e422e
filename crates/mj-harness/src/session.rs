//! A drivable page inside the running app.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mj_bridge::{BridgeError, CommandBridge};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

use crate::automation::{AutomationConnection, BrowsingContext, PageInfo};
use crate::error::{HarnessError, HarnessResult};

/// How often `wait_for_load` re-checks `document.readyState`.
const LOAD_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The attached connection plus the selected context and page.
///
/// Cloning shares the underlying connection. A session stays usable only
/// while its harness is `Ready`; after `close()` every call fails with a
/// connection error.
#[derive(Clone)]
pub struct AutomationSession {
    connection: Arc<dyn AutomationConnection>,
    context: BrowsingContext,
    page: PageInfo,
    page_session: String,
}

impl std::fmt::Debug for AutomationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutomationSession")
            .field("context", &self.context.id)
            .field("page", &self.page)
            .field("page_session", &self.page_session)
            .finish_non_exhaustive()
    }
}

impl AutomationSession {
    pub(crate) fn new(
        connection: Arc<dyn AutomationConnection>,
        context: BrowsingContext,
        page: PageInfo,
        page_session: String,
    ) -> Self {
        Self {
            connection,
            context,
            page,
            page_session,
        }
    }

    pub fn context(&self) -> &BrowsingContext {
        &self.context
    }

    /// The page this session drives, as it was when the session attached.
    pub fn page(&self) -> &PageInfo {
        &self.page
    }

    pub fn connection(&self) -> &Arc<dyn AutomationConnection> {
        &self.connection
    }

    /// Evaluate `expression` in the page, awaiting a returned promise.
    pub async fn evaluate(&self, expression: &str) -> HarnessResult<Value> {
        trace!(page = %self.page.target_id, expression, "evaluate");
        self.connection
            .evaluate(&self.page_session, expression, true)
            .await
    }

    /// [`Self::evaluate`] decoded into `T`.
    pub async fn evaluate_as<T: DeserializeOwned>(&self, expression: &str) -> HarnessResult<T> {
        let value = self.evaluate(expression).await?;
        serde_json::from_value(value)
            .map_err(|e| HarnessError::Protocol(format!("unexpected value from `{expression}`: {e}")))
    }

    pub async fn title(&self) -> HarnessResult<String> {
        self.evaluate_as("document.title").await
    }

    pub async fn url(&self) -> HarnessResult<String> {
        self.evaluate_as("window.location.href").await
    }

    /// Wait until `document.readyState` is `complete`.
    pub async fn wait_for_load(&self, timeout: Duration) -> HarnessResult<()> {
        let start = Instant::now();
        loop {
            let state: String = self.evaluate_as("document.readyState").await?;
            if state == "complete" {
                debug!(elapsed_ms = start.elapsed().as_millis() as u64, "page loaded");
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(HarnessError::Protocol(format!(
                    "page not loaded after {}ms (readyState {state})",
                    timeout.as_millis()
                )));
            }
            tokio::time::sleep(LOAD_POLL_INTERVAL).await;
        }
    }

    /// Text of the first element matching `selector`, `None` if absent.
    pub async fn text_content(&self, selector: &str) -> HarnessResult<Option<String>> {
        let expression = format!(
            "(() => {{ const el = document.querySelector({}); return el ? el.textContent : null; }})()",
            js_string(selector)
        );
        self.evaluate_as(&expression).await
    }

    /// Whether an element matches `selector` and takes up space on screen.
    pub async fn is_visible(&self, selector: &str) -> HarnessResult<bool> {
        let expression = format!(
            "(() => {{ const el = document.querySelector({}); \
             if (!el) return false; \
             const r = el.getBoundingClientRect(); \
             return r.width > 0 && r.height > 0 && getComputedStyle(el).visibility !== 'hidden'; }})()",
            js_string(selector)
        );
        self.evaluate_as(&expression).await
    }

    /// Click the first element matching `selector`.
    pub async fn click(&self, selector: &str) -> HarnessResult<()> {
        let expression = format!(
            "(() => {{ const el = document.querySelector({sel}); \
             if (!el) throw new Error('no element matches ' + {sel}); \
             el.click(); return true; }})()",
            sel = js_string(selector)
        );
        self.evaluate(&expression).await.map(drop)
    }

    /// Set the value of an input matching `selector` and fire `input` and
    /// `change` so framework bindings see it.
    pub async fn fill(&self, selector: &str, value: &str) -> HarnessResult<()> {
        let expression = format!(
            "(() => {{ const el = document.querySelector({sel}); \
             if (!el) throw new Error('no element matches ' + {sel}); \
             el.focus(); el.value = {value}; \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
             return true; }})()",
            sel = js_string(selector),
            value = js_string(value)
        );
        self.evaluate(&expression).await.map(drop)
    }
}

/// Script that calls the backend command `name` through the page's IPC
/// bridge. The promise rejects with the backend's error string.
pub(crate) fn invoke_expression(name: &str, args: &Value) -> String {
    format!(
        "window.__TAURI_INTERNALS__.invoke({}, {})",
        js_string(name),
        args
    )
}

/// `s` as a JavaScript string literal.
fn js_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

#[async_trait]
impl CommandBridge for AutomationSession {
    async fn invoke_raw(&self, name: &str, args: Value) -> Result<Value, BridgeError> {
        debug!(command = name, "invoking backend command");
        match self.evaluate(&invoke_expression(name, &args)).await {
            Ok(value) => Ok(value),
            Err(HarnessError::ScriptException(message)) => Err(BridgeError::Rejected {
                command: name.to_string(),
                message,
            }),
            Err(other) => Err(BridgeError::Transport(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mj_bridge::{RepoStatus, invoke};
    use serde_json::json;
    use std::sync::Mutex;

    /// Answers evaluations from a table keyed by expression substring.
    #[derive(Default)]
    struct TableConnection {
        answers: Vec<(&'static str, Result<Value, &'static str>)>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AutomationConnection for TableConnection {
        async fn contexts(&self) -> HarnessResult<Vec<BrowsingContext>> {
            Ok(Vec::new())
        }

        async fn attach(&self, _page: &PageInfo) -> HarnessResult<String> {
            Ok("s".to_string())
        }

        async fn evaluate(&self, _: &str, expression: &str, _: bool) -> HarnessResult<Value> {
            self.seen.lock().unwrap().push(expression.to_string());
            match self.answers.iter().find(|(key, _)| expression.contains(key)) {
                Some((_, Ok(value))) => Ok(value.clone()),
                Some((_, Err(message))) => Err(HarnessError::ScriptException(message.to_string())),
                None => Err(HarnessError::Protocol(format!("unscripted: {expression}"))),
            }
        }

        async fn close(&self) -> HarnessResult<()> {
            Ok(())
        }
    }

    fn session(connection: TableConnection) -> (AutomationSession, Arc<TableConnection>) {
        let connection = Arc::new(connection);
        let page = PageInfo {
            target_id: "main".to_string(),
            kind: "page".to_string(),
            url: "tauri://localhost".to_string(),
            title: "Mighty Jujutsu".to_string(),
        };
        let context = BrowsingContext {
            id: Some("ctx".to_string()),
            pages: vec![page.clone()],
        };
        let session = AutomationSession::new(connection.clone(), context, page, "s".to_string());
        (session, connection)
    }

    #[test]
    fn invoke_expression_embeds_name_and_args_as_json() {
        let expression = invoke_expression("jj_status", &json!({"repoPath": "/tmp/it's"}));
        assert_eq!(
            expression,
            r#"window.__TAURI_INTERNALS__.invoke("jj_status", {"repoPath":"/tmp/it's"})"#
        );
    }

    #[test]
    fn selectors_are_quoted_safely() {
        assert_eq!(js_string(r#"a[title="x"]"#), r#""a[title=\"x\"]""#);
    }

    #[tokio::test]
    async fn typed_command_round_trips_through_the_page() {
        let (session, connection) = session(TableConnection {
            answers: vec![("jj_status", Ok(json!("Working copy clean")))],
            ..Default::default()
        });

        let status = invoke(&session, &RepoStatus { repo_path: Some("/repo".into()) })
            .await
            .unwrap();
        assert_eq!(status, "Working copy clean");
        assert!(connection.seen.lock().unwrap()[0].contains(r#""repoPath":"/repo""#));
    }

    #[tokio::test]
    async fn script_exception_becomes_rejection() {
        let (session, _) = session(TableConnection {
            answers: vec![("jj_status", Err("There is no jj repo"))],
            ..Default::default()
        });
        let err = invoke(&session, &RepoStatus::default()).await.unwrap_err();
        assert!(
            matches!(err, BridgeError::Rejected { ref message, .. } if message == "There is no jj repo"),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn other_failures_are_transport_errors() {
        let (session, _) = session(TableConnection::default());
        let err = invoke(&session, &RepoStatus::default()).await.unwrap_err();
        assert!(matches!(err, BridgeError::Transport(_)), "{err:?}");
    }

    #[tokio::test]
    async fn wait_for_load_times_out_on_a_stuck_page() {
        let (session, _) = session(TableConnection {
            answers: vec![("document.readyState", Ok(json!("loading")))],
            ..Default::default()
        });
        let err = session.wait_for_load(Duration::from_millis(120)).await.unwrap_err();
        assert!(matches!(err, HarnessError::Protocol(ref m) if m.contains("loading")));
    }

    #[tokio::test]
    async fn click_and_fill_target_the_selector() {
        let (session, connection) = session(TableConnection {
            answers: vec![
                ("el.click()", Ok(json!(true))),
                ("el.value =", Ok(json!(true))),
                ("window.location.href", Ok(json!("tauri://localhost/log"))),
            ],
            ..Default::default()
        });

        session.click("button.new-change").await.unwrap();
        session.fill("input[name=\"message\"]", "fix: it's done").await.unwrap();
        assert_eq!(session.url().await.unwrap(), "tauri://localhost/log");

        let seen = connection.seen.lock().unwrap();
        assert!(seen[0].contains(r#"document.querySelector("button.new-change")"#), "{}", seen[0]);
        assert!(seen[1].contains(r#"el.value = "fix: it's done""#), "{}", seen[1]);
        assert!(seen[1].contains("new Event('input'"), "{}", seen[1]);
        assert!(seen[1].contains("new Event('change'"), "{}", seen[1]);
    }

    #[tokio::test]
    async fn click_on_a_missing_element_fails() {
        let (session, _) = session(TableConnection {
            answers: vec![("el.click()", Err("Error: no element matches #gone"))],
            ..Default::default()
        });
        let err = session.click("#gone").await.unwrap_err();
        assert!(matches!(err, HarnessError::ScriptException(ref m) if m.contains("#gone")), "{err}");
    }

    #[tokio::test]
    async fn dom_helpers_decode_their_results() {
        let (session, _) = session(TableConnection {
            answers: vec![
                ("textContent", Ok(json!("main"))),
                ("getBoundingClientRect", Ok(json!(true))),
                ("document.title", Ok(json!("Mighty Jujutsu"))),
            ],
            ..Default::default()
        });
        assert_eq!(session.text_content("#bookmark").await.unwrap().as_deref(), Some("main"));
        assert!(session.is_visible("#bookmark").await.unwrap());
        assert_eq!(session.title().await.unwrap(), "Mighty Jujutsu");
    }
}
