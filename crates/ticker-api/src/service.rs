//! 스트리밍 서비스 조립.
//!
//! 레지스트리를 만들고 하트비트 모니터와 수명주기 컨트롤러를 백그라운드로 시작합니다.
//! 모든 백그라운드 태스크는 하나의 종료 토큰을 공유합니다.

use std::sync::Arc;
use std::time::Duration;

use ticker_core::StreamConfig;
use ticker_data::SeedSeriesProvider;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::websocket::{
    create_registry, start_heartbeat, start_lifecycle, LifecycleController, LifecycleHandle,
    LifecycleSettings, RegistryLimits, SharedRegistry, WsState,
};

/// 종료 시 백그라운드 태스크 대기 한도.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// 실행 중인 스트리밍 서비스.
pub struct StreamService {
    registry: SharedRegistry,
    lifecycle: LifecycleHandle,
    outbound_buffer: usize,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl StreamService {
    /// 서비스를 시작합니다.
    ///
    /// `shutdown`이 취소되면 하트비트와 컨트롤러가 멈추고, 컨트롤러는 모든 엔진을 정지합니다.
    pub fn start(
        config: &StreamConfig,
        provider: Arc<dyn SeedSeriesProvider>,
        shutdown: CancellationToken,
    ) -> Self {
        let registry = create_registry(RegistryLimits::from(config));

        let heartbeat = start_heartbeat(
            registry.clone(),
            config.heartbeat_interval(),
            shutdown.child_token(),
        );

        let (controller, lifecycle) = LifecycleController::new(
            registry.clone(),
            provider,
            LifecycleSettings::from(config),
        );
        let controller = start_lifecycle(controller, shutdown.child_token());

        info!(
            heartbeat_secs = config.heartbeat_interval_secs,
            tick_ms = config.tick_interval_ms,
            max_subscriptions = config.max_subscriptions,
            "Stream service started"
        );

        Self {
            registry,
            lifecycle,
            outbound_buffer: config.outbound_buffer,
            shutdown,
            tasks: vec![heartbeat, controller],
        }
    }

    /// 연결 레지스트리.
    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// 수명주기 컨트롤러 핸들.
    pub fn lifecycle(&self) -> LifecycleHandle {
        self.lifecycle.clone()
    }

    /// `/ws` 라우터 상태.
    pub fn ws_state(&self) -> WsState {
        WsState::new(self.registry.clone(), self.outbound_buffer)
    }

    /// 종료 토큰을 취소하고 백그라운드 태스크가 끝날 때까지 기다립니다.
    pub async fn shutdown(self) {
        self.shutdown.cancel();

        let joined = tokio::time::timeout(
            SHUTDOWN_TIMEOUT,
            futures::future::join_all(self.tasks),
        )
        .await;

        match joined {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!(error = %e, "Background task ended abnormally");
                    }
                }
                info!("Stream service stopped");
            }
            Err(_) => warn!("Stream service shutdown timed out"),
        }
    }
}
