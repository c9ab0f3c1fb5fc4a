//! Prometheus 메트릭 설정 및 유틸리티.
//!
//! 스트리밍 엔진의 연결, 브로드캐스트, 엔진 수명주기 메트릭을 수집하고
//! `/metrics` 엔드포인트로 노출합니다.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

/// 수요 조정 1회 소요 시간 히스토그램 이름.
const RECONCILE_DURATION: &str = "stream_reconcile_duration_seconds";

/// Prometheus 메트릭 레코더를 설정하고 핸들을 반환합니다.
///
/// # 반환값
///
/// `/metrics` 엔드포인트에서 메트릭을 렌더링하기 위한 `PrometheusHandle`
///
/// # Errors
///
/// 레코더가 이미 설치되어 있으면 에러를 반환합니다.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(RECONCILE_DURATION.to_string()),
            &[0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        )?
        .install_recorder()
}

// ============================================================================
// 연결 메트릭
// ============================================================================

/// WebSocket 연결 수 증가.
pub fn increment_websocket_connections() {
    gauge!("websocket_connections_active").increment(1.0);
}

/// WebSocket 연결 수 감소.
pub fn decrement_websocket_connections() {
    gauge!("websocket_connections_active").decrement(1.0);
}

/// 하트비트로 퇴출된 연결 수 기록.
pub fn record_heartbeat_evictions(count: usize) {
    if count > 0 {
        counter!("stream_heartbeat_evictions_total").increment(count as u64);
    }
}

// ============================================================================
// 브로드캐스트 메트릭
// ============================================================================

/// 심볼별 틱 카운터 증가.
pub fn record_tick(symbol: &str) {
    counter!("stream_ticks_total", "symbol" => symbol.to_string()).increment(1);
}

/// 송신 큐가 가득 차서 버려진 틱 수 기록.
pub fn record_broadcast_dropped(count: usize) {
    if count > 0 {
        counter!("stream_broadcast_dropped_total").increment(count as u64);
    }
}

/// 송신 큐가 닫혀 실패한 전송 수 기록.
pub fn record_broadcast_failed(count: usize) {
    if count > 0 {
        counter!("stream_broadcast_failed_total").increment(count as u64);
    }
}

// ============================================================================
// 엔진 수명주기 메트릭
// ============================================================================

/// 실행 중인 엔진 수 설정.
pub fn set_engines_running(count: usize) {
    gauge!("stream_engines_running").set(count as f64);
}

/// 시드 조회 실패 카운터 증가.
pub fn record_seed_failure(provider: &str) {
    counter!("stream_seed_failures_total", "provider" => provider.to_string()).increment(1);
}

/// 수요 조정 소요 시간 기록.
pub fn record_reconcile_duration(duration_secs: f64) {
    histogram!(RECONCILE_DURATION).record(duration_secs);
}
