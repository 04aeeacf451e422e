use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
struct DriverState {
    reject_with: Option<String>,
    next_session: AtomicUsize,
    created: Mutex<Vec<Value>>,
    deleted: Mutex<Vec<String>>,
}

/// Minimal W3C WebDriver server: `/status`, `POST /session` and
/// `DELETE /session/{id}`.
#[derive(Debug)]
pub struct FakeWebDriver {
    addr: SocketAddr,
    state: Arc<DriverState>,
    task: JoinHandle<()>,
}

impl FakeWebDriver {
    pub async fn start(port: u16) -> Self {
        Self::serve(port, None).await
    }

    /// A driver whose session requests all fail with `message`.
    pub async fn rejecting(port: u16, message: &str) -> Self {
        Self::serve(port, Some(message.to_string())).await
    }

    async fn serve(port: u16, reject_with: Option<String>) -> Self {
        let listener = crate::bind(port).await;
        let addr = listener.local_addr().expect("listener has no address");
        let state = Arc::new(DriverState {
            reject_with,
            ..Default::default()
        });

        let app = Router::new()
            .route("/status", get(status))
            .route("/session", post(create_session))
            .route("/session/{id}", delete(delete_session))
            .with_state(Arc::clone(&state));
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self { addr, state, task }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Request bodies of every `POST /session`.
    pub fn created_sessions(&self) -> Vec<Value> {
        self.state.created.lock().expect("created lock").clone()
    }

    pub fn deleted_sessions(&self) -> Vec<String> {
        self.state.deleted.lock().expect("deleted lock").clone()
    }
}

impl Drop for FakeWebDriver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn status() -> Json<Value> {
    Json(json!({ "value": { "ready": true, "message": "" } }))
}

async fn create_session(State(state): State<Arc<DriverState>>, Json(body): Json<Value>) -> Response {
    state.created.lock().expect("created lock").push(body.clone());
    if let Some(message) = &state.reject_with {
        let error = json!({ "value": { "error": "session not created", "message": message } });
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response();
    }

    let n = state.next_session.fetch_add(1, Ordering::SeqCst);
    let capabilities = body
        .pointer("/capabilities/alwaysMatch")
        .cloned()
        .unwrap_or(Value::Null);
    Json(json!({
        "value": { "sessionId": format!("fake-session-{n}"), "capabilities": capabilities }
    }))
    .into_response()
}

async fn delete_session(State(state): State<Arc<DriverState>>, Path(id): Path<String>) -> Json<Value> {
    state.deleted.lock().expect("deleted lock").push(id);
    Json(json!({ "value": null }))
}
