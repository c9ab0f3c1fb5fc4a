//! HTTP 라우트.
//!
//! # 라우트 구조
//!
//! - `/health` - 헬스 체크
//! - `/api/v1/stream` - 스트리밍 현황, 세션 초기화
//! - `/metrics` - Prometheus 메트릭
//! - `/ws` - WebSocket 시세 스트림

pub mod health;
pub mod stream;

pub use health::{health_router, ComponentHealth, ComponentStatus, HealthResponse};
pub use stream::{stream_router, StreamStatsResponse};

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, http::Method, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::state::AppState;
use crate::websocket::{websocket_router, WsState};

/// REST API 라우터 생성.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(health_router())
        .nest("/api/v1/stream", stream_router())
}

/// /metrics 엔드포인트 핸들러.
async fn metrics_handler(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

/// CORS 레이어 생성.
///
/// `CORS_ORIGINS`(쉼표 구분)가 설정되어 있으면 해당 origin만 허용하고,
/// 없으면 모든 origin을 허용합니다.
fn cors_layer() -> CorsLayer {
    let allow_origin = match std::env::var("CORS_ORIGINS") {
        Ok(origins) if !origins.is_empty() => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();

            if origins.is_empty() {
                warn!("CORS_ORIGINS is set but contains no valid origins, allowing any");
                AllowOrigin::any()
            } else {
                info!(count = origins.len(), "CORS configured with allowed origins");
                AllowOrigin::list(origins)
            }
        }
        _ => AllowOrigin::any(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE, axum::http::header::ACCEPT])
        .max_age(Duration::from_secs(3600))
}

/// 전체 라우터 생성.
///
/// 메트릭 레코더가 설치되지 않았으면 `/metrics`는 등록하지 않습니다.
pub fn build_router(
    state: Arc<AppState>,
    ws_state: WsState,
    metrics_handle: Option<PrometheusHandle>,
) -> Router {
    let mut router = Router::new()
        .merge(create_api_router().with_state(state))
        .merge(websocket_router(ws_state));

    if let Some(handle) = metrics_handle {
        let metrics_router = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(handle);
        router = router.merge(metrics_router);
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
}
