//! 스트리밍 운영 endpoint.
//!
//! # 엔드포인트
//!
//! - `GET /api/v1/stream/stats` - 연결/구독/엔진 현황
//! - `POST /api/v1/stream/session/reset` - 모든 심볼의 세션 OHLV 초기화

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::error::{lifecycle_error, ApiResult};
use crate::state::AppState;
use crate::websocket::SymbolStats;

/// 스트리밍 현황 응답.
#[derive(Debug, Serialize)]
pub struct StreamStatsResponse {
    /// 현재 연결 수
    pub connections: usize,
    /// 심볼별 구독자 수
    pub symbols: Vec<SymbolStats>,
    /// 실행 중인 엔진 수
    pub running_engines: usize,
}

/// 스트리밍 현황 조회.
pub async fn stream_stats(State(state): State<Arc<AppState>>) -> Json<StreamStatsResponse> {
    let stats = state.registry.stats().await;

    Json(StreamStatsResponse {
        connections: stats.connections,
        symbols: stats.symbols,
        running_engines: state.lifecycle.running_count(),
    })
}

/// 세션 초기화.
///
/// 거래일 경계에서 운영자가 호출합니다. 보관 중인 상태도 함께 초기화됩니다.
pub async fn reset_session(State(state): State<Arc<AppState>>) -> ApiResult<StatusCode> {
    let count = state
        .lifecycle
        .reset_sessions()
        .await
        .map_err(lifecycle_error)?;

    info!(symbols = count, "Session reset requested over HTTP");
    Ok(StatusCode::NO_CONTENT)
}

/// 스트리밍 라우터 생성.
pub fn stream_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stats", get(stream_stats))
        .route("/session/reset", post(reset_session))
}
