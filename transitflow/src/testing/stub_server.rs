//! A local HTTP server that answers from a script.
//!
//! Replies are queued per `(method, path)`; the last queued reply repeats
//! once the queue is down to one. Unscripted routes answer 404.

use axum::body::to_bytes;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A request seen by [`StubServer`].
#[derive(Debug, Clone)]
pub struct StubRequest {
    /// HTTP method.
    pub method: String,
    /// Path without query string.
    pub path: String,
    /// Raw query string.
    pub query: String,
    /// `Authorization` header, if any.
    pub authorization: Option<String>,
    /// Body, lossily decoded.
    pub body: String,
}

struct Route {
    method: String,
    path: String,
    replies: VecDeque<(u16, Value)>,
}

#[derive(Default)]
struct Script {
    routes: Vec<Route>,
    requests: Vec<StubRequest>,
}

type Shared = Arc<Mutex<Script>>;

/// Scripted JSON server bound to an ephemeral local port.
pub struct StubServer {
    url: String,
    script: Shared,
    task: JoinHandle<()>,
}

impl StubServer {
    /// Binds and starts serving.
    pub async fn start() -> Self {
        let script: Shared = Arc::default();
        let app = Router::new().fallback(answer).with_state(script.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub server");
        let addr = listener.local_addr().expect("stub server address");
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            url: format!("http://{addr}"),
            script,
            task,
        }
    }

    /// Base URL, e.g. `http://127.0.0.1:40123`.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Queues a reply for `method path`.
    pub fn reply(&self, method: &str, path: &str, status: u16, body: Value) {
        let mut script = self.script.lock();
        if let Some(route) = script
            .routes
            .iter_mut()
            .find(|r| r.method == method && r.path == path)
        {
            route.replies.push_back((status, body));
            return;
        }
        script.routes.push(Route {
            method: method.to_string(),
            path: path.to_string(),
            replies: VecDeque::from([(status, body)]),
        });
    }

    /// Requests received for `method path`, in order.
    pub fn requests_to(&self, method: &str, path: &str) -> Vec<StubRequest> {
        self.script
            .lock()
            .requests
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .cloned()
            .collect()
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<StubRequest> {
        self.script.lock().requests.clone()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn answer(State(script): State<Shared>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = to_bytes(body, usize::MAX)
        .await
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default();
    let method = parts.method.to_string();
    let path = parts.uri.path().to_string();

    let (status, reply) = {
        let mut script = script.lock();
        script.requests.push(StubRequest {
            method: method.clone(),
            path: path.clone(),
            query: parts.uri.query().unwrap_or_default().to_string(),
            authorization: parts
                .headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body,
        });
        script
            .routes
            .iter_mut()
            .find(|r| r.method == method && r.path == path)
            .and_then(|r| {
                if r.replies.len() > 1 {
                    r.replies.pop_front()
                } else {
                    r.replies.front().cloned()
                }
            })
            .unwrap_or_else(|| {
                (404, json!({"error": {"message": format!("no reply for {method} {path}")}}))
            })
    };

    (
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        [(header::CONTENT_TYPE, "application/json")],
        reply.to_string(),
    )
        .into_response()
}
