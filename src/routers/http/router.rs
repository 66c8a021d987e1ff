use crate::config::RouterConfig;
use crate::core::{ClusterManager, Selection, Worker, WorkerLoadGuard};
use crate::metrics::RouterMetrics;
use crate::routers::header_utils;
use crate::routers::http::stream::TrackedStream;
use crate::types::{count_tokens, ChatRequest, GenerateRequest, GenerationRequest, ProxyError};
use axum::{
    body::Body,
    http::{
        header::{CONTENT_LENGTH, CONTENT_TYPE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use futures_util::StreamExt;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Forwards generation requests to the instance chosen by the cluster's policy
#[derive(Debug)]
pub struct Router {
    cluster: Arc<ClusterManager>,
    client: Client,
    request_timeout: Duration,
    stream_timeout: Duration,
}

impl Router {
    pub fn new(
        cluster: Arc<ClusterManager>,
        request_timeout: Duration,
        stream_timeout: Duration,
    ) -> Self {
        let client = cluster.client().clone();
        Self {
            cluster,
            client,
            request_timeout,
            stream_timeout,
        }
    }

    pub fn from_config(cluster: Arc<ClusterManager>, config: &RouterConfig) -> Self {
        Self::new(
            cluster,
            Duration::from_secs(config.request_timeout_secs),
            Duration::from_secs(config.stream_timeout_secs),
        )
    }

    pub fn cluster(&self) -> &Arc<ClusterManager> {
        &self.cluster
    }

    pub fn get_worker_urls(&self) -> Vec<String> {
        self.cluster.worker_urls()
    }

    pub async fn route_generate(
        &self,
        headers: Option<&HeaderMap>,
        body: &GenerateRequest,
    ) -> Response {
        self.route_typed_request(headers, body).await
    }

    pub async fn route_chat(&self, headers: Option<&HeaderMap>, body: &ChatRequest) -> Response {
        self.route_typed_request(headers, body).await
    }

    pub async fn route_typed_request<T: GenerationRequest>(
        &self,
        headers: Option<&HeaderMap>,
        typed_req: &T,
    ) -> Response {
        match self.send_typed_request(headers, typed_req).await {
            Ok(response) => response,
            Err(e) => {
                RouterMetrics::record_request_error(T::ROUTE, e.kind());
                e.into_response()
            }
        }
    }

    async fn send_typed_request<T: GenerationRequest>(
        &self,
        headers: Option<&HeaderMap>,
        typed_req: &T,
    ) -> Result<Response, ProxyError> {
        let start = Instant::now();
        let route = T::ROUTE;
        let is_stream = typed_req.is_stream();

        let worker = match self.cluster.get_instance() {
            Selection::Selected(worker) => worker,
            Selection::Unavailable => {
                warn!(route, model = typed_req.model(), "No healthy Ollama instances available");
                return Err(ProxyError::NoHealthyWorkers);
            }
        };

        // Held until the response is fully produced; dropping it frees the slot
        let guard = WorkerLoadGuard::new(Arc::clone(&worker));

        // Unary calls get a deadline on the whole exchange. Streaming calls only
        // bound the wait for headers here; the client's read timeout then limits
        // the gap between chunks, so long generations are not cut off.
        let mut request_builder = self.client.post(worker.endpoint_url(route));
        if !is_stream {
            request_builder = request_builder.timeout(self.request_timeout);
        }
        let request_builder = header_utils::propagate_request_headers(
            request_builder.json(typed_req),
            headers,
        );

        debug!(
            worker_url = %worker.url(),
            route,
            model = typed_req.model(),
            stream = is_stream,
            "Forwarding request"
        );

        let sent = if is_stream {
            match tokio::time::timeout(self.stream_timeout, request_builder.send()).await {
                Ok(sent) => sent,
                Err(_) => {
                    error!(
                        "Timed out waiting for stream headers worker_url={} route={} timeout_secs={}",
                        worker.url(),
                        route,
                        self.stream_timeout.as_secs()
                    );
                    return Err(ProxyError::Timeout(format!(
                        "No response from {} within {}s",
                        worker.url(),
                        self.stream_timeout.as_secs()
                    )));
                }
            }
        } else {
            request_builder.send().await
        };
        let res = sent.map_err(|e| {
            error!(
                "Failed to send request worker_url={} route={} error={}",
                worker.url(),
                route,
                e
            );
            ProxyError::from(e)
        })?;

        let status = res.status();
        if !status.is_success() {
            let response_headers = header_utils::preserve_response_headers(res.headers());
            let body = res.bytes().await.map_err(|e| {
                error!(
                    "Failed to read error body worker_url={} status={} error={}",
                    worker.url(),
                    status,
                    e
                );
                ProxyError::from(e)
            })?;
            warn!(
                worker_url = %worker.url(),
                route,
                status = status.as_u16(),
                "Backend returned error status"
            );
            return Err(ProxyError::Backend {
                status,
                headers: response_headers,
                body,
            });
        }

        if is_stream {
            return Ok(self.stream_response::<T>(res, guard, start));
        }

        let response_headers = header_utils::preserve_response_headers(res.headers());
        let body = res.bytes().await.map_err(|e| {
            error!(
                "Failed to get response body worker_url={} route={} error={}",
                worker.url(),
                route,
                e
            );
            ProxyError::from(e)
        })?;
        drop(guard);

        let latency = start.elapsed();
        let tokens = response_tokens::<T>(&body);
        self.cluster.update_stats(worker.as_ref(), tokens, latency);
        RouterMetrics::record_request(route);
        RouterMetrics::record_request_duration(route, latency);

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }

    fn stream_response<T: GenerationRequest>(
        &self,
        res: reqwest::Response,
        guard: WorkerLoadGuard,
        start: Instant,
    ) -> Response {
        let status = res.status();
        let mut response_headers = header_utils::preserve_response_headers(res.headers());
        response_headers.remove(CONTENT_LENGTH);
        if !response_headers.contains_key(CONTENT_TYPE) {
            response_headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/x-ndjson"),
            );
        }

        let stream = TrackedStream::new(
            res.bytes_stream().boxed(),
            guard,
            Arc::clone(&self.cluster),
            T::response_text,
            start,
            T::ROUTE,
        );

        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        response
    }

    pub fn liveness(&self) -> Response {
        (StatusCode::OK, "OK").into_response()
    }

    pub fn readiness(&self) -> Response {
        // Ready as soon as one instance passes its probe
        let healthy_count = self.cluster.registry().healthy_count();
        let total_workers = self.cluster.registry().len();

        if healthy_count > 0 {
            Json(serde_json::json!({
                "status": "ready",
                "healthy_workers": healthy_count,
                "total_workers": total_workers
            }))
            .into_response()
        } else {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "reason": "no healthy workers available",
                    "total_workers": total_workers
                })),
            )
                .into_response()
        }
    }
}

/// Word count of the generated text in a unary response body
fn response_tokens<T: GenerationRequest>(body: &[u8]) -> u64 {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(value) => T::response_text(&value).map(count_tokens).unwrap_or(0),
        Err(e) => {
            debug!("Response body is not JSON, counting no tokens: {}", e);
            0
        }
    }
}
