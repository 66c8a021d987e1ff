use crate::{
    config::RouterConfig,
    core::{ClusterManager, WorkerResult},
    logging::{self, LoggingConfig},
    metrics::{self, PrometheusConfig},
    middleware,
    routers,
    types::{ChatRequest, GenerateRequest, GenerationRequest, ProxyError},
};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    serve, Json, Router,
};
use reqwest::Client;
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, signal};
use tracing::{error, info, warn, Level};

pub const SERVICE_NAME: &str = "Ollama Cluster Router";

#[derive(Debug)]
pub struct AppContext {
    pub client: Client,
    pub router_config: RouterConfig,
    pub cluster: Arc<ClusterManager>,
}

impl AppContext {
    pub fn new(router_config: RouterConfig, client: Client) -> WorkerResult<Self> {
        let cluster = Arc::new(ClusterManager::from_config(&router_config, client.clone())?);
        Ok(Self {
            client,
            router_config,
            cluster,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub router: Arc<routers::Router>,
    pub context: Arc<AppContext>,
}

impl AppState {
    pub fn new(context: Arc<AppContext>) -> Self {
        let router = Arc::new(routers::Router::from_config(
            Arc::clone(&context.cluster),
            &context.router_config,
        ));
        Self { router, context }
    }
}

// Fallback handler for unmatched routes
async fn sink_handler() -> Response {
    StatusCode::NOT_FOUND.into_response()
}

fn invalid_request<T: GenerationRequest>(rejection: JsonRejection) -> Response {
    warn!(route = T::ROUTE, "Rejected request body: {}", rejection.body_text());
    let error = ProxyError::InvalidRequest(rejection.body_text());
    crate::metrics::RouterMetrics::record_request_error(T::ROUTE, error.kind());
    error.into_response()
}

async fn root() -> Response {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
    .into_response()
}

// Health check endpoints
async fn liveness(State(state): State<Arc<AppState>>) -> Response {
    state.router.liveness()
}

async fn readiness(State(state): State<Arc<AppState>>) -> Response {
    state.router.readiness()
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    Json(state.context.cluster.status()).into_response()
}

async fn models(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({ "models": state.context.cluster.available_models() })).into_response()
}

// Generation endpoints
async fn generate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(body)) => state.router.route_generate(Some(&headers), &body).await,
        Err(rejection) => invalid_request::<GenerateRequest>(rejection),
    }
}

async fn generate_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(mut body)) => {
            body.set_stream(true);
            state.router.route_generate(Some(&headers), &body).await
        }
        Err(rejection) => invalid_request::<GenerateRequest>(rejection),
    }
}

async fn chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(body)) => state.router.route_chat(Some(&headers), &body).await,
        Err(rejection) => invalid_request::<ChatRequest>(rejection),
    }
}

async fn chat_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(mut body)) => {
            body.set_stream(true);
            state.router.route_chat(Some(&headers), &body).await
        }
        Err(rejection) => invalid_request::<ChatRequest>(rejection),
    }
}

/// Build the Axum application with all routes and middleware
pub fn build_app(
    app_state: Arc<AppState>,
    max_payload_size: usize,
    cors_allowed_origins: Vec<String>,
) -> Router {
    let generation_routes = Router::new()
        .route("/api/generate", post(generate))
        .route("/api/chat", post(chat))
        .route("/api/generate/stream", post(generate_stream))
        .route("/api/chat/stream", post(chat_stream));

    let public_routes = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/models", get(models))
        .route("/liveness", get(liveness))
        .route("/readiness", get(readiness));

    Router::new()
        .merge(generation_routes)
        .merge(public_routes)
        // Request body size limiting
        .layer(DefaultBodyLimit::disable())
        .layer(tower_http::limit::RequestBodyLimitLayer::new(
            max_payload_size,
        ))
        .layer(middleware::create_propagate_request_id_layer())
        .layer(middleware::create_logging_layer())
        .layer(middleware::create_request_id_layer())
        .layer(create_cors_layer(cors_allowed_origins))
        .fallback(sink_handler)
        .with_state(app_state)
}

/// Shared client for probes and forwarded requests
///
/// Unary calls and probes set a total timeout per request. The read timeout
/// resets on every successful read and is what bounds a stream between chunks.
pub fn build_client(config: &RouterConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .pool_idle_timeout(Some(Duration::from_secs(50)))
        .pool_max_idle_per_host(500)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .read_timeout(Duration::from_secs(config.stream_timeout_secs))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(30)))
        .build()
}

pub async fn startup(config: RouterConfig) -> Result<(), Box<dyn std::error::Error>> {
    let level = config.log_level.as_deref().map(logging::parse_level);
    let _log_guard = logging::init_logging(LoggingConfig {
        level: level.flatten().unwrap_or(Level::INFO),
        json_format: config.log_json,
        log_dir: config.log_dir.clone(),
        ..Default::default()
    });
    if let (Some(raw), Some(None)) = (&config.log_level, level) {
        warn!("Invalid log level string: '{}'. Defaulting to INFO.", raw);
    }

    // Initialize prometheus metrics exporter
    if let Some(metrics_config) = &config.metrics {
        metrics::start_prometheus(PrometheusConfig::from(metrics_config));
    }

    info!(
        "Starting router on {}:{} | policy: {} | instances: {} | max_payload: {}MB",
        config.host,
        config.port,
        config.policy,
        config.workers.len(),
        config.max_payload_size / (1024 * 1024)
    );

    let client = build_client(&config)?;
    let app_context = Arc::new(AppContext::new(config.clone(), client)?);
    let cluster = Arc::clone(&app_context.cluster);

    // First probe round completes before the listener opens
    let healthy = cluster.check_health().await;
    if healthy == 0 {
        warn!(
            "No healthy Ollama instances at startup ({} configured); requests get 503 until one recovers",
            cluster.registry().len()
        );
    } else {
        info!(
            "Initial health check: {}/{} instances healthy",
            healthy,
            cluster.registry().len()
        );
    }

    let health_checker = cluster.start_health_checker();
    info!(
        "Started health checker for instances with {}s interval",
        config.health_check.check_interval_secs
    );

    let app_state = Arc::new(AppState::new(app_context));
    info!("Router ready | instances: {:?}", app_state.router.get_worker_urls());

    let app = build_app(
        app_state,
        config.max_payload_size,
        config.cors_allowed_origins.clone(),
    );

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Starting server on {}", addr);
    let served = serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    health_checker.shutdown().await;
    info!("Health checker stopped");

    served.map_err(|e| Box::new(e) as Box<dyn std::error::Error>)?;
    Ok(())
}

// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}

// CORS Layer Creation
fn create_cors_layer(allowed_origins: Vec<String>) -> tower_http::cors::CorsLayer {
    use tower_http::cors::Any;

    let cors = if allowed_origins.is_empty() {
        // Allow all origins if none specified
        tower_http::cors::CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(Any)
    } else {
        // Restrict to specific origins
        let origins: Vec<http::HeaderValue> = allowed_origins
            .into_iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();

        tower_http::cors::CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
            .allow_headers([http::header::CONTENT_TYPE, http::header::AUTHORIZATION])
            .expose_headers([http::header::HeaderName::from_static(
                middleware::REQUEST_ID_HEADER,
            )])
    };

    cors.max_age(Duration::from_secs(3600))
}
