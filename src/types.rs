//! Request types for the Ollama generation API and the proxy error type

use axum::body::Body;
use axum::http::{header::CONTENT_TYPE, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const GENERATE_ROUTE: &str = "/api/generate";
pub const CHAT_ROUTE: &str = "/api/chat";

/// Common behaviour of requests the router forwards to an Ollama backend
pub trait GenerationRequest: Serialize + Send + Sync {
    /// Backend path the request is posted to
    const ROUTE: &'static str;

    fn is_stream(&self) -> bool;

    fn set_stream(&mut self, stream: bool);

    fn model(&self) -> &str;

    /// Incremental output text carried by one response object or stream line
    fn response_text(value: &Value) -> Option<&str>;
}

/// Body of `POST /api/generate`
///
/// Only the fields the router reads are typed; everything else is kept in
/// `rest` and forwarded untouched.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl GenerationRequest for GenerateRequest {
    const ROUTE: &'static str = GENERATE_ROUTE;

    fn is_stream(&self) -> bool {
        self.stream
    }

    fn set_stream(&mut self, stream: bool) {
        self.stream = stream;
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn response_text(value: &Value) -> Option<&str> {
        value.get("response").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// Body of `POST /api/chat`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl GenerationRequest for ChatRequest {
    const ROUTE: &'static str = CHAT_ROUTE;

    fn is_stream(&self) -> bool {
        self.stream
    }

    fn set_stream(&mut self, stream: bool) {
        self.stream = stream;
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn response_text(value: &Value) -> Option<&str> {
        value
            .get("message")
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
    }
}

/// Approximate token count: whitespace-separated words
pub fn count_tokens(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

/// Errors surfaced to clients of the router
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("No healthy Ollama instances available")]
    NoHealthyWorkers,

    /// Non-success answer from the backend, passed through as-is
    #[error("Backend returned {status}")]
    Backend {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },

    #[error("Request to Ollama instance timed out: {0}")]
    Timeout(String),

    #[error("Request to Ollama instance failed: {0}")]
    Transport(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::NoHealthyWorkers => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Backend { status, .. } => *status,
            ProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Transport(_) => StatusCode::BAD_GATEWAY,
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Short label used for the error metric
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::NoHealthyWorkers => "no_healthy_workers",
            ProxyError::Backend { .. } => "backend_error",
            ProxyError::Timeout(_) => "timeout",
            ProxyError::Transport(_) => "transport_error",
            ProxyError::InvalidRequest(_) => "invalid_request",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if let ProxyError::Backend { headers, body, .. } = self {
            let mut response = Response::new(Body::from(body));
            *response.status_mut() = status;
            *response.headers_mut() = headers;
            return response;
        }

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16()
        });

        let mut response = Response::new(Body::from(body.to_string()));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ProxyError::Timeout(error.to_string())
        } else {
            ProxyError::Transport(error.to_string())
        }
    }
}
