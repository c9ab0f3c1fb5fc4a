//! Ticker API 서버 진입점.
//!
//! 설정 로드, 로깅/메트릭 초기화, 시드 제공자 구성, 스트리밍 서비스 시작,
//! HTTP/WebSocket 서버 실행 순서로 동작합니다.

use std::sync::Arc;

use anyhow::Context;
use ticker_api::metrics::setup_metrics_recorder;
use ticker_api::{build_router, AppState, StreamService};
use ticker_core::{init_logging, AppConfig, DataConfig, LogConfig, SeedProviderKind};
use ticker_data::{
    AlphaVantageProvider, CachedSeedProvider, RedisCache, RedisConfig, SeedSeriesProvider,
    StaticSeedProvider,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Redis 캐시가 있으면 cache-aside로 감쌉니다.
fn with_cache<P>(inner: P, cache: Option<RedisCache>, ttl_secs: u64) -> Arc<dyn SeedSeriesProvider>
where
    P: SeedSeriesProvider + 'static,
{
    match cache {
        Some(cache) => Arc::new(CachedSeedProvider::new(inner, cache, ttl_secs)),
        None => Arc::new(inner),
    }
}

/// 설정에 맞는 시드 제공자 생성.
fn build_provider(
    config: &DataConfig,
    cache: Option<RedisCache>,
) -> anyhow::Result<Arc<dyn SeedSeriesProvider>> {
    let provider = match config.provider {
        SeedProviderKind::Static => {
            if config.static_prices.is_empty() {
                warn!("Static seed provider has no prices configured");
            }
            with_cache(
                StaticSeedProvider::from_prices(&config.static_prices),
                cache,
                config.cache_ttl_secs,
            )
        }
        SeedProviderKind::AlphaVantage => {
            if config.alpha_vantage_api_key == "demo" {
                warn!("Using Alpha Vantage demo key, most symbols will be unavailable");
            }
            let inner = AlphaVantageProvider::from_config(config)
                .context("failed to build Alpha Vantage client")?;
            with_cache(inner, cache, config.cache_ttl_secs)
        }
    };

    Ok(provider)
}

/// Redis 연결. 실패하면 캐시 없이 계속합니다.
async fn connect_redis(config: &DataConfig) -> Option<RedisCache> {
    let url = config.redis_url.as_ref()?;

    match RedisCache::connect(&RedisConfig { url: url.clone() }).await {
        Ok(cache) => Some(cache),
        Err(e) => {
            warn!(error = %e, "Redis unavailable, seed cache disabled");
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env 파일 로드 (있는 경우)
    let _ = dotenvy::dotenv();

    let config = AppConfig::load_default().context("failed to load configuration")?;

    init_logging(LogConfig::from(&config.logging))
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    info!("Starting Ticker API server...");

    let metrics_handle = match setup_metrics_recorder() {
        Ok(handle) => {
            info!("Prometheus metrics recorder initialized");
            Some(handle)
        }
        Err(e) => {
            warn!(error = %e, "Metrics recorder unavailable, /metrics disabled");
            None
        }
    };

    let redis = connect_redis(&config.data).await;
    let provider = build_provider(&config.data, redis.clone())?;

    let shutdown_token = CancellationToken::new();
    let service = StreamService::start(&config.stream, provider.clone(), shutdown_token.clone());

    let mut state = AppState::new(service.registry(), service.lifecycle(), provider.name());
    if let Some(redis) = redis {
        state = state.with_redis(redis);
    }
    let state = Arc::new(state);

    info!(
        version = %state.version,
        provider = state.provider,
        has_cache = state.redis.is_some(),
        "Application state initialized"
    );

    let app = build_router(state, service.ws_state(), metrics_handle);

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(%addr, "API server listening");
    info!("WebSocket available at ws://{}/ws", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_token.clone()))
        .await
        .context("server error")?;

    info!("Server shutdown initiated, cleaning up...");
    service.shutdown().await;
    info!("Server stopped gracefully");

    Ok(())
}

/// Graceful shutdown 시그널 대기.
///
/// Ctrl+C 또는 SIGTERM을 받으면 종료 토큰을 취소합니다.
async fn shutdown_signal(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }

    shutdown_token.cancel();
    info!("Shutdown signal propagated to background tasks");
}
