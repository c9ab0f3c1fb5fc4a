//! 모든 핸들러에서 공유되는 애플리케이션 상태.
//!
//! AppState는 Arc로 래핑되어 HTTP 핸들러 간에 공유됩니다.

use std::time::Instant;

use ticker_data::RedisCache;

use crate::websocket::{LifecycleHandle, SharedRegistry};

/// 애플리케이션 공유 상태.
#[derive(Clone)]
pub struct AppState {
    /// 연결 레지스트리 (연결 맵 + 구독 인덱스)
    pub registry: SharedRegistry,

    /// 수명주기 컨트롤러 핸들 - 실행 심볼 조회, 세션 초기화
    pub lifecycle: LifecycleHandle,

    /// 시드 시계열 캐시 (설정된 경우)
    pub redis: Option<RedisCache>,

    /// 시드 데이터 제공자 이름
    pub provider: &'static str,

    /// 서버 버전
    pub version: String,

    /// 서버 시작 시각
    pub started_at: Instant,
}

impl AppState {
    /// 새 상태 생성.
    pub fn new(registry: SharedRegistry, lifecycle: LifecycleHandle, provider: &'static str) -> Self {
        Self {
            registry,
            lifecycle,
            redis: None,
            provider,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Instant::now(),
        }
    }

    /// Redis 캐시 설정.
    pub fn with_redis(mut self, redis: RedisCache) -> Self {
        self.redis = Some(redis);
        self
    }

    /// 서버 가동 시간 (초).
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Redis 연결 상태 확인. 미설정이면 false.
    pub async fn is_redis_healthy(&self) -> bool {
        match &self.redis {
            Some(redis) => redis.health_check().await.unwrap_or(false),
            None => false,
        }
    }
}

/// 테스트용 AppState 생성 헬퍼.
///
/// 컨트롤러 태스크 없이 핸들만 만들기 때문에 세션 초기화는 항상 실패합니다.
#[cfg(any(test, feature = "test-utils"))]
pub fn create_test_state() -> AppState {
    use std::sync::Arc;
    use ticker_data::StaticSeedProvider;

    use crate::websocket::{create_registry, LifecycleController, LifecycleSettings, RegistryLimits};

    let registry = create_registry(RegistryLimits::default());
    let provider = Arc::new(StaticSeedProvider::new());
    let settings = LifecycleSettings::from(&ticker_core::StreamConfig::default());
    let (_controller, lifecycle) = LifecycleController::new(registry.clone(), provider, settings);

    AppState::new(registry, lifecycle, "static")
}
