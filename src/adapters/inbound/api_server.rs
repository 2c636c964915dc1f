//! Gateway API Server
//!
//! HTTP surface of the gateway: admission control on every route, the
//! OCR endpoints, health and Prometheus metrics.

use crate::application::OcrService;
use crate::domain::entities::{OcrRequest, RateLimitDecision};
use crate::domain::errors::GatewayError;
use crate::domain::services::{
    ClientResolver, TierRouter, ALLOWED_CONTENT_TYPES, MAX_IMAGE_BYTES, SUPPORTED_LANGUAGES,
};
use crate::domain::value_objects::{CircuitState, ClientId, RateLimitTier};
use crate::infrastructure::{ShutdownController, TieredRateLimiter};
use axum::{
    extract::{multipart::MultipartRejection, ConnectInfo, DefaultBodyLimit, Multipart, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
const X_PROCESSING_TIME: HeaderName = HeaderName::from_static("x-processing-time");
const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// How long `run` waits for in-flight requests after shutdown begins.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<OcrService>,
    pub limiter: Arc<TieredRateLimiter>,
    pub resolver: Arc<ClientResolver>,
    pub shutdown: ShutdownController,
}

impl AppState {
    pub fn new(
        service: Arc<OcrService>,
        limiter: Arc<TieredRateLimiter>,
        resolver: ClientResolver,
        shutdown: ShutdownController,
    ) -> Self {
        Self {
            service,
            limiter,
            resolver: Arc::new(resolver),
            shutdown,
        }
    }
}

/// Gateway HTTP server.
pub struct ApiServer {
    listen_addr: String,
    state: AppState,
}

impl ApiServer {
    pub fn new(listen_addr: String, state: AppState) -> Self {
        Self { listen_addr, state }
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Gateway routes with `downstream` mounted behind the same
    /// admission control.
    pub fn router(&self, downstream: Router) -> Router {
        build_router(self.state.clone(), downstream)
    }

    /// Serve until the shutdown controller fires, then wait for
    /// in-flight requests to drain.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub async fn run(&self, downstream: Router) -> anyhow::Result<()> {
        let app = self.router(downstream);
        let listener = TcpListener::bind(&self.listen_addr).await?;
        tracing::info!("OCR gateway listening on {}", self.listen_addr);

        let shutdown = self.state.shutdown.clone();
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

        if !self.state.shutdown.wait_for_drain(DRAIN_TIMEOUT).await {
            tracing::warn!("shutting down with requests still in flight");
        }
        tracing::info!("OCR gateway stopped");
        Ok(())
    }
}

pub fn build_router(state: AppState, downstream: Router) -> Router {
    Router::new()
        .route("/api/ocr", post(ocr_handler).get(ocr_info_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state.clone())
        .merge(downstream)
        .layer(middleware::from_fn_with_state(state, admission))
        .layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES * 2))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .layer(TraceLayer::new_for_http())
}

// Admission control

async fn admission(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(tier) = TierRouter::resolve(req.uri().path()) else {
        return next.run(req).await;
    };

    let client = client_id(&state.resolver, &req);
    match state.limiter.check(tier, &client).await {
        Ok(decision) if decision.allowed => {
            let mut response = next.run(req).await;
            rate_limit_headers(response.headers_mut(), &decision);
            response
        }
        Ok(decision) => rate_limited(tier, &decision),
        Err(e) => {
            // Counter store down: serve the request unthrottled.
            tracing::error!(tier = tier.as_str(), error = %e, "rate limiter unavailable, failing open");
            next.run(req).await
        }
    }
}

fn client_id(resolver: &ClientResolver, req: &Request) -> ClientId {
    let headers = req.headers();
    let client = resolver.resolve(|name| headers.get(name).and_then(|v| v.to_str().ok()));
    if !client.is_unknown() {
        return client;
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| ClientId::new(addr.ip().to_string()))
        .unwrap_or(client)
}

fn rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(
        X_RATELIMIT_RESET,
        HeaderValue::from(decision.reset_at_ms.div_ceil(1000)),
    );
}

fn rate_limited(tier: RateLimitTier, decision: &RateLimitDecision) -> Response {
    let mut response = GatewayError::RateLimitExceeded {
        tier: tier.as_str().to_string(),
        limit: decision.limit,
        retry_after_ms: decision.retry_after_ms,
    }
    .into_response();
    rate_limit_headers(response.headers_mut(), decision);
    response
}

// Error mapping

fn ceil_secs(d: Duration) -> u64 {
    (d.as_millis() as u64).div_ceil(1000).max(1)
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            GatewayError::RateLimitExceeded {
                tier,
                retry_after_ms,
                ..
            } => {
                let retry_after = retry_after_ms.div_ceil(1000);
                let body = json!({
                    "error": "Too many requests",
                    "message": format!("Rate limit exceeded for {} requests. Please try again later.", tier),
                    "retryAfter": retry_after,
                    "retryAfterMs": retry_after_ms,
                });
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, retry_after.to_string())],
                    Json(body),
                )
                    .into_response()
            }
            GatewayError::CircuitOpen { retry_after } => {
                let secs = ceil_secs(retry_after);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    [(header::RETRY_AFTER, secs.to_string())],
                    Json(json!({
                        "error": "OCR service temporarily unavailable. Please try again later.",
                        "retryAfter": secs,
                    })),
                )
                    .into_response()
            }
            GatewayError::UpstreamTimeout(_) | GatewayError::Upstream { .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": "OCR processing failed. Please try again later."
                })),
            )
                .into_response(),
            GatewayError::InvalidInput(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            GatewayError::Cancelled => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "Server is shutting down" })),
            )
                .into_response(),
            GatewayError::CounterStore(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal server error" })),
            )
                .into_response(),
        }
    }
}

// Handler functions

/// Accepts a JSON array (`["en","fr"]`) or a comma list (`en,fr`).
fn parse_languages(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.starts_with('[') {
        if let Ok(list) = serde_json::from_str::<Vec<String>>(raw) {
            return list;
        }
    }
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

async fn read_form(mut multipart: Multipart) -> Result<OcrRequest, GatewayError> {
    let mut image: Option<(Bytes, String, String)> = None;
    let mut languages = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| GatewayError::InvalidInput(e.body_text()))?
    {
        match field.name() {
            Some("image") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().unwrap_or_default().to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| GatewayError::InvalidInput(e.body_text()))?;
                image = Some((data, file_name, content_type));
            }
            Some("languages") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| GatewayError::InvalidInput(e.body_text()))?;
                languages = parse_languages(&raw);
            }
            _ => {}
        }
    }

    let (data, file_name, content_type) =
        image.ok_or_else(|| GatewayError::InvalidInput("No image file provided".into()))?;
    Ok(OcrRequest::new(data, &file_name, &content_type).with_languages(languages))
}

async fn ocr_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, GatewayError> {
    let _guard = state.shutdown.request_guard();
    let started = Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();

    let multipart = multipart.map_err(|e| {
        GatewayError::InvalidInput(format!("Invalid content type. Use multipart/form-data ({})", e))
    })?;
    let request = read_form(multipart).await?;
    tracing::debug!(
        request_id = %request_id,
        bytes = request.size(),
        file = %request.file_name,
        "OCR upload received"
    );

    let outcome = state.service.recognize(request, &state.shutdown).await?;
    let result = outcome.result;
    let cache_key: String = outcome.cache_key.chars().take(16).collect();

    let body = json!({
        "success": true,
        "result": {
            "text": result.text,
            "confidence": result.confidence,
            "processingTime": result.processing_time_ms,
            "language": result.language,
            "detectedRegions": result.detected_regions,
            "cached": outcome.cached,
            "cacheKey": format!("{}...", cache_key),
        }
    });

    let elapsed = started.elapsed().as_millis() as u64;
    let mut response = (StatusCode::OK, Json(body)).into_response();
    let headers = response.headers_mut();
    headers.insert(X_PROCESSING_TIME, HeaderValue::from(elapsed));
    if let Ok(v) = HeaderValue::from_str(&request_id) {
        headers.insert(X_REQUEST_ID, v);
    }
    Ok(response)
}

async fn ocr_info_handler(State(state): State<AppState>) -> impl IntoResponse {
    let service_healthy = state.service.upstream_health().await;
    let metrics = state.service.metrics().snapshot();
    let circuit = state.service.breaker().snapshot();

    Json(json!({
        "available": true,
        "serviceHealthy": service_healthy,
        "supportedFormats": ALLOWED_CONTENT_TYPES,
        "maxFileSize": format!("{}MB", MAX_IMAGE_BYTES / (1024 * 1024)),
        "supportedLanguages": SUPPORTED_LANGUAGES,
        "metrics": {
            "requests": metrics.total_requests,
            "successRate": format!("{}%", metrics.success_rate),
            "cacheHitRate": format!("{}%", metrics.cache_hit_rate),
            "avgProcessingTime": format!("{}ms", metrics.avg_latency_ms.round() as u64),
        },
        "circuitBreaker": {
            "state": circuit.state,
            "failures": circuit.consecutive_failures,
        },
    }))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let circuit = state.service.breaker().snapshot();
    let status = if state.shutdown.is_shutdown() {
        "shutting_down"
    } else if circuit.state == CircuitState::Closed {
        "ok"
    } else {
        "degraded"
    };

    Json(json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "circuit": {
            "state": circuit.state,
            "consecutiveFailures": circuit.consecutive_failures,
            "halfOpenSuccesses": circuit.half_open_successes,
        },
        "metrics": state.service.metrics().snapshot(),
        "cacheEntries": state.service.cache().len(),
        "rateLimitStore": state.limiter.store_name(),
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.service.metrics().export_prometheus(),
    )
}
