#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use futures_util::{stream, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use ollama_router_rs::config::{PolicyConfig, RouterConfig, WorkerSpec};
use ollama_router_rs::server::{build_app, build_client, AppContext, AppState};

/// Observable state of one fake Ollama instance
pub struct MockState {
    pub models: Vec<String>,
    pub healthy: AtomicBool,
    pub error_status: Mutex<Option<StatusCode>>,
    pub hang_after_first_chunk: AtomicBool,
    pub chunk_delay_ms: AtomicU64,
    /// While set, generate calls park on `gate` until released
    pub hold_requests: AtomicBool,
    pub held: AtomicUsize,
    pub gate: Semaphore,
    pub generate_calls: AtomicUsize,
    pub chat_calls: AtomicUsize,
    pub tags_calls: AtomicUsize,
    pub last_body: Mutex<Option<Value>>,
}

pub struct MockOllama {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl MockOllama {
    /// Serve a fake instance on an ephemeral port; needs a running runtime
    pub fn spawn(models: &[&str]) -> Self {
        let state = Arc::new(MockState {
            models: models.iter().map(|m| m.to_string()).collect(),
            healthy: AtomicBool::new(true),
            error_status: Mutex::new(None),
            hang_after_first_chunk: AtomicBool::new(false),
            chunk_delay_ms: AtomicU64::new(0),
            hold_requests: AtomicBool::new(false),
            held: AtomicUsize::new(0),
            gate: Semaphore::new(0),
            generate_calls: AtomicUsize::new(0),
            chat_calls: AtomicUsize::new(0),
            tags_calls: AtomicUsize::new(0),
            last_body: Mutex::new(None),
        });

        let app = axum::Router::new()
            .route("/api/tags", get(tags))
            .route("/api/generate", post(generate))
            .route("/api/chat", post(chat))
            .with_state(Arc::clone(&state));

        let (addr, handle) = spawn_axum_server(app);
        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn fail_with(&self, status: StatusCode) {
        *self.state.error_status.lock() = Some(status);
    }

    pub fn hang_after_first_chunk(&self) {
        self.state
            .hang_after_first_chunk
            .store(true, Ordering::SeqCst);
    }

    /// Pause this long before every stream chunk
    pub fn delay_chunks(&self, delay: std::time::Duration) {
        self.state
            .chunk_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn hold_requests(&self) {
        self.state.hold_requests.store(true, Ordering::SeqCst);
    }

    /// Let every parked and future generate call through
    pub fn release_requests(&self) {
        self.state.hold_requests.store(false, Ordering::SeqCst);
        self.state.gate.add_permits(1024);
    }

    /// Generate calls currently parked
    pub fn held(&self) -> usize {
        self.state.held.load(Ordering::SeqCst)
    }

    pub fn generate_calls(&self) -> usize {
        self.state.generate_calls.load(Ordering::SeqCst)
    }

    pub fn chat_calls(&self) -> usize {
        self.state.chat_calls.load(Ordering::SeqCst)
    }

    pub fn last_body(&self) -> Option<Value> {
        self.state.last_body.lock().clone()
    }
}

impl Drop for MockOllama {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn spawn_axum_server(app: axum::Router) -> (SocketAddr, JoinHandle<()>) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    listener.set_nonblocking(true).expect("nonblocking");
    let listener = tokio::net::TcpListener::from_std(listener).expect("to tokio listener");
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    (addr, handle)
}

async fn tags(State(state): State<Arc<MockState>>) -> Response {
    state.tags_calls.fetch_add(1, Ordering::SeqCst);
    if !state.healthy.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "unavailable").into_response();
    }
    let models: Vec<Value> = state
        .models
        .iter()
        .map(|name| json!({"name": name, "size": 1}))
        .collect();
    Json(json!({ "models": models })).into_response()
}

fn error_response(state: &MockState) -> Option<Response> {
    let status = (*state.error_status.lock())?;
    Some((status, Json(json!({"error": "model 'missing' not found"}))).into_response())
}

fn ndjson_response(state: &MockState, lines: Vec<Value>) -> Response {
    let chunks: Vec<Result<Bytes, Infallible>> = lines
        .into_iter()
        .map(|line| Ok(Bytes::from(format!("{}\n", line))))
        .collect();

    let delay = state.chunk_delay_ms.load(Ordering::SeqCst);
    let body = if state.hang_after_first_chunk.load(Ordering::SeqCst) {
        let first = chunks.into_iter().take(1);
        Body::from_stream(stream::iter(first).chain(stream::pending()))
    } else if delay > 0 {
        Body::from_stream(stream::iter(chunks).then(move |chunk| async move {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            chunk
        }))
    } else {
        Body::from_stream(stream::iter(chunks))
    };

    Response::builder()
        .header(CONTENT_TYPE, "application/x-ndjson")
        .body(body)
        .unwrap()
}

async fn generate(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    state.generate_calls.fetch_add(1, Ordering::SeqCst);
    *state.last_body.lock() = Some(body.clone());
    if state.hold_requests.load(Ordering::SeqCst) {
        state.held.fetch_add(1, Ordering::SeqCst);
        let _ = state.gate.acquire().await;
        state.held.fetch_sub(1, Ordering::SeqCst);
    }
    if let Some(response) = error_response(&state) {
        return response;
    }

    let model = body["model"].as_str().unwrap_or_default().to_string();
    if body["stream"].as_bool().unwrap_or(false) {
        return ndjson_response(
            &state,
            vec![
                json!({"model": model, "response": "The sky", "done": false}),
                json!({"model": model, "response": " is blue", "done": false}),
                json!({"model": model, "response": "", "done": true}),
            ],
        );
    }

    Json(json!({"model": model, "response": "The sky is blue", "done": true})).into_response()
}

async fn chat(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    state.chat_calls.fetch_add(1, Ordering::SeqCst);
    *state.last_body.lock() = Some(body.clone());
    if let Some(response) = error_response(&state) {
        return response;
    }

    let model = body["model"].as_str().unwrap_or_default().to_string();
    if body["stream"].as_bool().unwrap_or(false) {
        return ndjson_response(
            &state,
            vec![
                json!({"model": model, "message": {"role": "assistant", "content": "Hello"}, "done": false}),
                json!({"model": model, "message": {"role": "assistant", "content": " there, friend"}, "done": false}),
                json!({"model": model, "message": {"role": "assistant", "content": ""}, "done": true}),
            ],
        );
    }

    Json(json!({
        "model": model,
        "message": {"role": "assistant", "content": "Hello there"},
        "done": true
    }))
    .into_response()
}

/// A URL on the loopback interface where nothing listens
pub fn dead_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("local_addr").port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}

pub fn test_config(urls: &[String], policy: PolicyConfig) -> RouterConfig {
    let mut config = RouterConfig {
        workers: urls.iter().map(|url| WorkerSpec::new(url.as_str())).collect(),
        policy,
        request_timeout_secs: 5,
        stream_timeout_secs: 10,
        connect_timeout_secs: 2,
        ..Default::default()
    };
    config.health_check.timeout_secs = 2;
    config
}

/// Build the router app, running one probe round first like startup does
pub async fn build_test_app(config: RouterConfig) -> (axum::Router, Arc<AppState>) {
    let client = build_client(&config).unwrap();
    let context = Arc::new(AppContext::new(config.clone(), client).unwrap());
    context.cluster.check_health().await;

    let state = Arc::new(AppState::new(context));
    let app = build_app(Arc::clone(&state), config.max_payload_size, vec![]);
    (app, state)
}

pub fn json_request(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_bytes(response: Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
