//! Chrome DevTools Protocol client over a browser-level WebSocket.
//!
//! Requests are matched to responses by id. A reader task owns the read
//! half of the socket and completes the pending request for each response;
//! event frames are dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use super::trait_def::{Automation, AutomationConnection};
use super::types::{
    BrowsingContext, CdpError, CdpMessage, CdpRequest, PageInfo, TargetInfo, VersionInfo,
    exception_message, group_contexts,
};
use crate::error::{HarnessError, HarnessResult};
use crate::probe;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type Reply = Result<Value, CdpError>;
type Pending = Arc<StdMutex<HashMap<u64, oneshot::Sender<Reply>>>>;

/// Connects to a CDP endpoint by discovering its WebSocket from
/// `/json/version`.
#[derive(Debug, Clone)]
pub struct CdpAutomation {
    http: reqwest::Client,
    call_timeout: Duration,
}

impl CdpAutomation {
    pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new() -> HarnessResult<Self> {
        Ok(Self {
            http: probe::local_client()?,
            call_timeout: Self::DEFAULT_CALL_TIMEOUT,
        })
    }

    /// Limit on how long a single protocol call may wait for its response.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    async fn discover(&self, endpoint: &str) -> HarnessResult<VersionInfo> {
        let url = format!("{}/json/version", endpoint.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| HarnessError::Connection(format!("GET {url}: {e}")))?;
        response
            .json::<VersionInfo>()
            .await
            .map_err(|e| HarnessError::Connection(format!("unreadable /json/version body: {e}")))
    }
}

#[async_trait]
impl Automation for CdpAutomation {
    fn name(&self) -> &str {
        "cdp"
    }

    async fn connect(&self, endpoint: &str) -> HarnessResult<Arc<dyn AutomationConnection>> {
        let version = self.discover(endpoint).await?;
        let ws_url = version.web_socket_debugger_url;
        debug!(url = %ws_url, browser = ?version.browser, "connecting to debugger websocket");

        let (stream, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| HarnessError::Connection(format!("websocket {ws_url}: {e}")))?;

        info!(url = %ws_url, "automation connected");
        Ok(Arc::new(CdpConnection::start(stream, self.call_timeout)))
    }
}

/// One open CDP WebSocket.
pub struct CdpConnection {
    sink: Mutex<WsSink>,
    pending: Pending,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    call_timeout: Duration,
    reader: JoinHandle<()>,
}

impl std::fmt::Debug for CdpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdpConnection")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl CdpConnection {
    fn start(stream: WsStream, call_timeout: Duration) -> Self {
        let (sink, source) = stream.split();
        let pending: Pending = Arc::default();
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_loop(source, Arc::clone(&pending), Arc::clone(&closed)));

        Self {
            sink: Mutex::new(sink),
            pending,
            next_id: AtomicU64::new(1),
            closed,
            call_timeout,
            reader,
        }
    }

    /// Send `method` and wait for its response.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> HarnessResult<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HarnessError::Connection("connection is closed".to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = serde_json::to_string(&CdpRequest {
            id,
            method,
            params,
            session_id,
        })
        .map_err(|e| HarnessError::Protocol(format!("failed to encode {method}: {e}")))?;

        let rx = self.register(id)?;

        trace!(id, method, "cdp request");
        let sent = self.sink.lock().await.send(Message::Text(frame.into())).await;
        if let Err(e) = sent {
            lock(&self.pending).remove(&id);
            return Err(HarnessError::Connection(format!("failed to send {method}: {e}")));
        }

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(error))) => Err(HarnessError::Protocol(format!(
                "{method} failed: {} (code {})",
                error.message, error.code
            ))),
            Ok(Err(_)) => Err(HarnessError::Connection(format!(
                "connection closed while waiting for {method}"
            ))),
            Err(_) => {
                lock(&self.pending).remove(&id);
                Err(HarnessError::Protocol(format!(
                    "{method} got no response within {}ms",
                    self.call_timeout.as_millis()
                )))
            }
        }
    }

    /// Add a pending slot for `id`.
    ///
    /// The reader marks the connection closed before it clears the pending
    /// map. Checking again after the insert catches a clear that ran in
    /// between.
    fn register(&self, id: u64) -> HarnessResult<oneshot::Receiver<Reply>> {
        let (tx, rx) = oneshot::channel();
        let mut pending = lock(&self.pending);
        pending.insert(id, tx);
        if self.closed.load(Ordering::SeqCst) {
            pending.remove(&id);
            return Err(HarnessError::Connection("connection is closed".to_string()));
        }
        Ok(rx)
    }
}

#[async_trait]
impl AutomationConnection for CdpConnection {
    async fn contexts(&self) -> HarnessResult<Vec<BrowsingContext>> {
        let result = self.call("Target.getTargets", json!({}), None).await?;
        let infos = result.get("targetInfos").cloned().unwrap_or(Value::Array(Vec::new()));
        let targets: Vec<TargetInfo> = serde_json::from_value(infos)
            .map_err(|e| HarnessError::Protocol(format!("unreadable target list: {e}")))?;
        Ok(group_contexts(targets))
    }

    async fn attach(&self, page: &PageInfo) -> HarnessResult<String> {
        let result = self
            .call(
                "Target.attachToTarget",
                json!({ "targetId": page.target_id, "flatten": true }),
                None,
            )
            .await?;
        result
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| HarnessError::Protocol("attachToTarget returned no sessionId".to_string()))
    }

    async fn evaluate(
        &self,
        session_id: &str,
        expression: &str,
        await_promise: bool,
    ) -> HarnessResult<Value> {
        let result = self
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "awaitPromise": await_promise,
                    "returnByValue": true,
                }),
                Some(session_id),
            )
            .await?;

        if let Some(message) = exception_message(&result) {
            return Err(HarnessError::ScriptException(message));
        }
        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn close(&self) -> HarnessResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("closing automation connection");
        let mut sink = self.sink.lock().await;
        sink.send(Message::Close(None))
            .await
            .map_err(|e| HarnessError::Connection(format!("failed to close websocket: {e}")))
    }
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(mut source: SplitStream<WsStream>, pending: Pending, closed: Arc<AtomicBool>) {
    while let Some(frame) = source.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                if !closed.load(Ordering::SeqCst) {
                    warn!(error = %e, "automation websocket failed");
                }
                break;
            }
        };

        let message: CdpMessage = match serde_json::from_str(text.as_str()) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "unreadable cdp frame");
                continue;
            }
        };
        // Events have no id.
        let Some(id) = message.id else { continue };

        let reply = match message.error {
            Some(error) => Err(error),
            None => Ok(message.result.unwrap_or(Value::Null)),
        };
        match lock(&pending).remove(&id) {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => trace!(id, "response for unknown request"),
        }
    }

    closed.store(true, Ordering::SeqCst);
    // Dropping the senders fails every waiting call.
    lock(&pending).clear();
    debug!("automation websocket reader finished");
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
