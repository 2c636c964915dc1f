//! ocr-gateway - Resilient admission and OCR gateway
//!
//! This is the composition root that wires together all the components.

use axum::Router;
use ocr_gateway::adapters::inbound::{ApiServer, AppState};
use ocr_gateway::adapters::outbound::{DashMapCounterStore, HttpOcrUpstream, RedisCounterStore};
use ocr_gateway::application::OcrService;
use ocr_gateway::config::load_config;
use ocr_gateway::domain::ports::{Clock, CounterStore, SystemClock};
use ocr_gateway::domain::services::ClientResolver;
use ocr_gateway::infrastructure::{
    shutdown_signal, CircuitBreaker, MetricsAggregator, ResponseCache, RetryHandler,
    ShutdownController, TieredRateLimiter,
};
use std::sync::Arc;
use tracing_subscriber::fmt::format::FmtSpan;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load and validate configuration from environment
    let cfg = load_config()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    tracing::info!(
        "starting ocr-gateway listen={} upstream={}",
        cfg.listen_addr,
        cfg.upstream_url
    );

    // ===== COMPOSITION ROOT =====
    // Wire up all adapters and services

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let metrics = Arc::new(MetricsAggregator::new());
    let shutdown = ShutdownController::new();

    // 1. Create outbound adapters

    // Rate-limit counters (Redis when shared, DashMap otherwise)
    let store: Arc<dyn CounterStore> = match &cfg.redis_url {
        Some(url) => Arc::new(RedisCounterStore::connect(url).await?),
        None => {
            tracing::info!("rate limit counters stored in process memory");
            Arc::new(DashMapCounterStore::new())
        }
    };

    // OCR upstream (HTTP)
    let upstream = Arc::new(HttpOcrUpstream::new(
        &cfg.upstream_url,
        cfg.upstream_api_key.clone(),
    )?);

    // 2. Create resilience components
    let limiter = Arc::new(TieredRateLimiter::new(
        cfg.rate_limits.clone(),
        store,
        clock.clone(),
        metrics.clone(),
    ));
    let cache = Arc::new(ResponseCache::new(cfg.cache.clone(), clock.clone()));
    let breaker = Arc::new(CircuitBreaker::new(
        cfg.breaker.clone(),
        clock.clone(),
        metrics.clone(),
    ));
    let retry = RetryHandler::new(cfg.retry.clone());

    // 3. Create application service
    let service = Arc::new(OcrService::new(
        upstream,
        cache.clone(),
        breaker,
        retry,
        metrics.clone(),
        cfg.upstream_timeout,
    ));

    // 4. Background tasks
    let tasks = vec![
        limiter.start_purge_task(cfg.rate_limit_purge_interval),
        cache.start_sweep_task(cfg.cache_sweep_interval),
        metrics.start_summary_task(cfg.metrics_summary_interval),
    ];

    // 5. Create inbound adapter and run
    let state = AppState::new(
        service,
        limiter,
        ClientResolver::new(cfg.trusted_ip_headers.clone()),
        shutdown.clone(),
    );
    let server = ApiServer::new(cfg.listen_addr.clone(), state);

    tokio::spawn(shutdown_signal(shutdown));
    let result = server.run(Router::new()).await;

    for task in tasks {
        task.abort();
    }
    metrics.log_summary();
    result
}
