use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::task::JoinHandle;

/// A target the fake browser reports from `Target.getTargets`.
#[derive(Debug, Clone)]
pub struct FakeTarget {
    pub id: String,
    pub kind: String,
    pub context: Option<String>,
    pub title: String,
    pub url: String,
}

impl FakeTarget {
    pub fn page(id: &str, context: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: "page".to_string(),
            context: Some(context.to_string()),
            title: String::new(),
            url: "tauri://localhost/".to_string(),
        }
    }

    /// A target that is not a page (e.g. `service_worker`).
    pub fn other(id: &str, kind: &str, context: &str) -> Self {
        Self {
            kind: kind.to_string(),
            ..Self::page(id, context)
        }
    }

    pub fn titled(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    fn info(&self) -> Value {
        json!({
            "targetId": self.id,
            "type": self.kind,
            "title": self.title,
            "url": self.url,
            "attached": false,
            "browserContextId": self.context,
        })
    }
}

#[derive(Debug, Clone)]
enum Evaluation {
    Returns(Value),
    /// An `Error` object was thrown.
    Throws(String),
    /// A promise rejected with a plain string.
    Rejects(String),
}

#[derive(Debug, Default)]
pub struct FakeBrowserBuilder {
    port: u16,
    ready_after: Duration,
    never_ready: bool,
    targets: Vec<FakeTarget>,
    evaluations: Vec<(String, Evaluation)>,
}

impl FakeBrowserBuilder {
    /// Listen on `port` instead of an ephemeral one.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Answer 503 on `/json/version` until `delay` after start.
    pub fn ready_after(mut self, delay: Duration) -> Self {
        self.ready_after = delay;
        self
    }

    /// Answer 503 on `/json/version` forever.
    pub fn never_ready(mut self) -> Self {
        self.never_ready = true;
        self
    }

    pub fn target(mut self, target: FakeTarget) -> Self {
        self.targets.push(target);
        self
    }

    /// Evaluations whose expression contains `needle` return `value`.
    pub fn evaluate_returns(mut self, needle: &str, value: Value) -> Self {
        self.evaluations.push((needle.to_string(), Evaluation::Returns(value)));
        self
    }

    /// Evaluations whose expression contains `needle` throw an `Error`
    /// described as `description`.
    pub fn evaluate_throws(mut self, needle: &str, description: &str) -> Self {
        self.evaluations
            .push((needle.to_string(), Evaluation::Throws(description.to_string())));
        self
    }

    /// Evaluations whose expression contains `needle` reject with the
    /// string `message`, the way a failed IPC invoke does.
    pub fn evaluate_rejects(mut self, needle: &str, message: &str) -> Self {
        self.evaluations
            .push((needle.to_string(), Evaluation::Rejects(message.to_string())));
        self
    }

    pub async fn start(self) -> FakeBrowser {
        let listener = crate::bind(self.port).await;
        let addr = listener.local_addr().expect("listener has no address");

        let state = Arc::new(BrowserState {
            started: Instant::now(),
            ready_after: (!self.never_ready).then_some(self.ready_after),
            port: addr.port(),
            targets: self.targets,
            evaluations: self.evaluations,
            methods: Mutex::new(Vec::new()),
            version_hits: AtomicUsize::new(0),
            closed_sockets: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/json/version", get(version))
            .route("/devtools/browser/{id}", get(upgrade))
            .with_state(Arc::clone(&state));
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        FakeBrowser { addr, state, task }
    }
}

#[derive(Debug)]
struct BrowserState {
    started: Instant,
    ready_after: Option<Duration>,
    port: u16,
    targets: Vec<FakeTarget>,
    evaluations: Vec<(String, Evaluation)>,
    methods: Mutex<Vec<String>>,
    version_hits: AtomicUsize,
    closed_sockets: AtomicUsize,
}

impl BrowserState {
    fn is_ready(&self) -> bool {
        self.ready_after
            .is_some_and(|delay| self.started.elapsed() >= delay)
    }
}

/// A browser-like debug endpoint speaking just enough CDP for the harness.
#[derive(Debug)]
pub struct FakeBrowser {
    addr: SocketAddr,
    state: Arc<BrowserState>,
    task: JoinHandle<()>,
}

impl FakeBrowser {
    pub fn builder() -> FakeBrowserBuilder {
        FakeBrowserBuilder::default()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// `http://127.0.0.1:<port>`
    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn version_url(&self) -> String {
        format!("{}/json/version", self.endpoint())
    }

    /// CDP methods received so far, in order.
    pub fn recorded_methods(&self) -> Vec<String> {
        self.state.methods.lock().expect("methods lock").clone()
    }

    /// Number of `/json/version` requests served.
    pub fn version_hits(&self) -> usize {
        self.state.version_hits.load(Ordering::SeqCst)
    }

    /// Number of WebSockets the client closed.
    pub fn closed_sockets(&self) -> usize {
        self.state.closed_sockets.load(Ordering::SeqCst)
    }

    /// Wait up to `limit` for at least `count` client closes.
    pub async fn wait_for_closed_sockets(&self, count: usize, limit: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < limit {
            if self.closed_sockets() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.closed_sockets() >= count
    }
}

impl Drop for FakeBrowser {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn version(State(state): State<Arc<BrowserState>>) -> Response {
    state.version_hits.fetch_add(1, Ordering::SeqCst);
    if !state.is_ready() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    Json(json!({
        "Browser": "FakeBrowser/1.0",
        "Protocol-Version": "1.3",
        "webSocketDebuggerUrl": format!("ws://127.0.0.1:{}/devtools/browser/fake", state.port),
    }))
    .into_response()
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<Arc<BrowserState>>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(mut socket: WebSocket, state: Arc<BrowserState>) {
    while let Some(Ok(message)) = socket.recv().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => {
                state.closed_sockets.fetch_add(1, Ordering::SeqCst);
                break;
            }
            _ => continue,
        };
        let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let method = request
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let params = request.get("params").cloned().unwrap_or(Value::Null);
        state.methods.lock().expect("methods lock").push(method.clone());

        for event in events_for(&method, &params) {
            if socket.send(Message::Text(event.to_string().into())).await.is_err() {
                return;
            }
        }

        let reply = match respond(&state, &method, &params) {
            Ok(result) => json!({ "id": id, "result": result }),
            Err(message) => json!({ "id": id, "error": { "code": -32601, "message": message } }),
        };
        if socket.send(Message::Text(reply.to_string().into())).await.is_err() {
            return;
        }
    }
}

/// Unsolicited frames a real browser emits around some calls.
fn events_for(method: &str, params: &Value) -> Vec<Value> {
    match method {
        "Target.attachToTarget" => vec![json!({
            "method": "Target.attachedToTarget",
            "params": { "targetInfo": { "targetId": params.get("targetId") } }
        })],
        _ => Vec::new(),
    }
}

fn respond(state: &BrowserState, method: &str, params: &Value) -> Result<Value, String> {
    match method {
        "Target.getTargets" => Ok(json!({
            "targetInfos": state.targets.iter().map(FakeTarget::info).collect::<Vec<_>>()
        })),
        "Target.attachToTarget" => {
            let target_id = params.get("targetId").and_then(Value::as_str).unwrap_or_default();
            if state.targets.iter().any(|t| t.id == target_id) {
                Ok(json!({ "sessionId": format!("session-{target_id}") }))
            } else {
                Err(format!("No target with given id found: {target_id}"))
            }
        }
        "Runtime.evaluate" => {
            let expression = params.get("expression").and_then(Value::as_str).unwrap_or_default();
            Ok(evaluate(state, expression))
        }
        other => Err(format!("'{other}' wasn't found")),
    }
}

fn evaluate(state: &BrowserState, expression: &str) -> Value {
    let rule = state
        .evaluations
        .iter()
        .find(|(needle, _)| expression.contains(needle.as_str()))
        .map(|(_, rule)| rule);

    match rule {
        Some(Evaluation::Returns(value)) => json!({ "result": { "type": js_type(value), "value": value } }),
        Some(Evaluation::Throws(description)) => json!({
            "result": { "type": "object", "subtype": "error", "description": description },
            "exceptionDetails": {
                "exceptionId": 1,
                "text": "Uncaught",
                "lineNumber": 0,
                "columnNumber": 0,
                "exception": {
                    "type": "object",
                    "subtype": "error",
                    "className": "Error",
                    "description": description,
                }
            }
        }),
        Some(Evaluation::Rejects(message)) => json!({
            "result": { "type": "string", "value": message },
            "exceptionDetails": {
                "exceptionId": 1,
                "text": "Uncaught (in promise)",
                "lineNumber": 0,
                "columnNumber": 0,
                "exception": { "type": "string", "value": message }
            }
        }),
        None => json!({ "result": { "type": "undefined" } }),
    }
}

fn js_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "object",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) | Value::Object(_) => "object",
    }
}
