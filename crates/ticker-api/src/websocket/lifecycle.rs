//! 수요 기반 엔진 수명주기 컨트롤러.
//!
//! 주기적으로 구독 인덱스의 활성 심볼을 읽어 실행 중인 엔진 집합과 맞춥니다.
//!
//! | 상황 | 동작 |
//! |------|------|
//! | 활성 심볼, 엔진 없음 | 보관 상태가 있으면 재개, 없으면 시드 조회 후 시작 |
//! | 엔진 실행 중, 심볼 비활성 | 엔진 정지, 상태를 유예 기간 동안 보관 |
//! | 보관 상태가 유예 기간 초과 | 폐기 |
//! | 엔진 태스크가 스스로 종료(패닉) | 회수 후 같은 주기에 재시작 |
//!
//! 시드 조회 실패는 로그만 남기고 다음 주기에 다시 시도합니다.
//! 엔진 맵은 컨트롤러 태스크만 소유하며, 외부에서는 [`LifecycleHandle`]로 접근합니다.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use ticker_core::StreamConfig;
use ticker_data::SeedSeriesProvider;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::{SharedRegistry, TickBroadcaster};
use super::simulator::{EngineHandle, SimulationState};
use crate::metrics::{record_reconcile_duration, record_seed_failure, set_engines_running};

const COMMAND_BUFFER: usize = 16;

/// 컨트롤러 에러.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("lifecycle controller is not running")]
    Unavailable,
}

/// 컨트롤러 명령.
#[derive(Debug)]
pub enum LifecycleCommand {
    /// 실행 중인 엔진과 보관 상태의 세션 초기화
    ResetSessions {
        /// 초기화한 심볼 수
        reply: oneshot::Sender<usize>,
    },
}

/// 컨트롤러 핸들.
#[derive(Debug, Clone)]
pub struct LifecycleHandle {
    commands: mpsc::Sender<LifecycleCommand>,
    running: watch::Receiver<BTreeSet<String>>,
}

impl LifecycleHandle {
    /// 엔진이 실행 중인 심볼.
    pub fn running_symbols(&self) -> BTreeSet<String> {
        self.running.borrow().clone()
    }

    /// 실행 중인 엔진 수.
    pub fn running_count(&self) -> usize {
        self.running.borrow().len()
    }

    /// 실행 심볼 변경을 구독합니다.
    pub fn watch_running(&self) -> watch::Receiver<BTreeSet<String>> {
        self.running.clone()
    }

    /// 모든 심볼의 세션을 초기화합니다.
    ///
    /// # Errors
    ///
    /// 컨트롤러 태스크가 종료되었으면 [`LifecycleError::Unavailable`]
    pub async fn reset_sessions(&self) -> Result<usize, LifecycleError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(LifecycleCommand::ResetSessions { reply })
            .await
            .map_err(|_| LifecycleError::Unavailable)?;
        rx.await.map_err(|_| LifecycleError::Unavailable)
    }
}

/// 수요 조정 1회 결과.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// 새로 시드해서 시작한 심볼
    pub started: Vec<String>,
    /// 보관 상태에서 재개한 심볼
    pub resumed: Vec<String>,
    /// 정지 후 보관한 심볼
    pub stopped: Vec<String>,
    /// 유예 기간이 지나 폐기한 심볼
    pub purged: Vec<String>,
    /// 시드 조회에 실패한 심볼
    pub failed: Vec<String>,
    /// 태스크가 예기치 않게 종료되어 회수한 심볼
    pub crashed: Vec<String>,
}

impl ReconcileReport {
    /// 아무 변화도 없었는지 여부.
    pub fn is_empty(&self) -> bool {
        self.started.is_empty()
            && self.resumed.is_empty()
            && self.stopped.is_empty()
            && self.purged.is_empty()
            && self.failed.is_empty()
            && self.crashed.is_empty()
    }
}

/// 컨트롤러 주기 설정.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleSettings {
    /// 엔진 틱 주기
    pub tick_interval: Duration,
    /// 수요 조정 주기
    pub reconcile_interval: Duration,
    /// 보관 상태 유예 기간
    pub grace_period: Duration,
}

impl From<&StreamConfig> for LifecycleSettings {
    fn from(config: &StreamConfig) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            reconcile_interval: config.reconcile_interval(),
            grace_period: config.grace_period(),
        }
    }
}

#[derive(Debug)]
struct RetainedState {
    state: SimulationState,
    since: Instant,
}

/// 수명주기 컨트롤러.
pub struct LifecycleController {
    registry: SharedRegistry,
    provider: Arc<dyn SeedSeriesProvider>,
    settings: LifecycleSettings,
    running: HashMap<String, EngineHandle>,
    retained: HashMap<String, RetainedState>,
    commands: mpsc::Receiver<LifecycleCommand>,
    running_tx: watch::Sender<BTreeSet<String>>,
}

impl LifecycleController {
    /// 새 컨트롤러와 핸들 생성.
    pub fn new(
        registry: SharedRegistry,
        provider: Arc<dyn SeedSeriesProvider>,
        settings: LifecycleSettings,
    ) -> (Self, LifecycleHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (running_tx, running_rx) = watch::channel(BTreeSet::new());

        let controller = Self {
            registry,
            provider,
            settings,
            running: HashMap::new(),
            retained: HashMap::new(),
            commands: command_rx,
            running_tx,
        };
        let handle = LifecycleHandle {
            commands: command_tx,
            running: running_rx,
        };

        (controller, handle)
    }

    /// 엔진이 실행 중인 심볼.
    pub fn running_symbols(&self) -> BTreeSet<String> {
        self.running.keys().cloned().collect()
    }

    /// 유예 기간 중 보관된 심볼.
    pub fn retained_symbols(&self) -> BTreeSet<String> {
        self.retained.keys().cloned().collect()
    }

    /// 활성 심볼과 실행 중인 엔진을 한 번 맞춥니다.
    pub async fn reconcile(&mut self) -> ReconcileReport {
        let started_at = Instant::now();
        let active = self.registry.active_symbols().await;
        let mut report = ReconcileReport::default();

        // 0. 스스로 끝난 엔진 회수. 상태가 남아 있으면 재개, 없으면 다시 시드
        let finished: Vec<String> = self
            .running
            .iter()
            .filter(|(_, engine)| engine.is_finished())
            .map(|(symbol, _)| symbol.clone())
            .collect();

        for symbol in finished {
            let Some(engine) = self.running.remove(&symbol) else {
                continue;
            };
            warn!(symbol = %symbol, "Simulation engine exited unexpectedly, reclaiming");
            if let Some(state) = engine.stop().await {
                self.retained.insert(
                    symbol.clone(),
                    RetainedState {
                        state,
                        since: Instant::now(),
                    },
                );
            }
            report.crashed.push(symbol);
        }

        // 1. 수요가 사라진 엔진 정지
        let vanished: Vec<String> = self
            .running
            .keys()
            .filter(|symbol| !active.contains(*symbol))
            .cloned()
            .collect();

        for symbol in vanished {
            let Some(engine) = self.running.remove(&symbol) else {
                continue;
            };
            if let Some(state) = engine.stop().await {
                self.retained.insert(
                    symbol.clone(),
                    RetainedState {
                        state,
                        since: Instant::now(),
                    },
                );
            }
            debug!(symbol = %symbol, "Engine stopped, state retained");
            report.stopped.push(symbol);
        }

        // 2. 새 수요: 보관 상태 재개 또는 시드 조회
        let missing: Vec<String> = active
            .iter()
            .filter(|symbol| !self.running.contains_key(*symbol))
            .cloned()
            .collect();

        let mut to_seed = Vec::new();
        for symbol in missing {
            match self.retained.remove(&symbol) {
                Some(retained) => {
                    self.spawn_engine(symbol.clone(), retained.state);
                    debug!(symbol = %symbol, "Engine resumed from retained state");
                    report.resumed.push(symbol);
                }
                None => to_seed.push(symbol),
            }
        }

        let provider = Arc::clone(&self.provider);
        let seeded = join_all(to_seed.into_iter().map(|symbol| {
            let provider = Arc::clone(&provider);
            async move {
                let result = provider
                    .fetch_seed_series(&symbol)
                    .await
                    .and_then(|candles| SimulationState::seed(&symbol, &candles));
                (symbol, result)
            }
        }))
        .await;

        for (symbol, result) in seeded {
            match result {
                Ok(state) => {
                    self.spawn_engine(symbol.clone(), state);
                    report.started.push(symbol);
                }
                Err(e) => {
                    warn!(
                        symbol = %symbol,
                        provider = self.provider.name(),
                        error = %e,
                        retryable = e.is_retryable(),
                        "Seed fetch failed, will retry on next poll"
                    );
                    record_seed_failure(self.provider.name());
                    report.failed.push(symbol);
                }
            }
        }

        // 3. 유예 기간이 지난 보관 상태 폐기
        let grace = self.settings.grace_period;
        let mut purged = Vec::new();
        self.retained.retain(|symbol, retained| {
            let keep = active.contains(symbol) || retained.since.elapsed() < grace;
            if !keep {
                purged.push(symbol.clone());
            }
            keep
        });
        purged.sort();
        report.purged = purged;

        self.publish_running();
        record_reconcile_duration(started_at.elapsed().as_secs_f64());

        report
    }

    fn spawn_engine(&mut self, symbol: String, state: SimulationState) {
        let broadcaster: Arc<dyn TickBroadcaster> = self.registry.clone();
        let engine = EngineHandle::spawn(state, broadcaster, self.settings.tick_interval);
        self.running.insert(symbol, engine);
    }

    fn publish_running(&self) {
        set_engines_running(self.running.len());
        self.running_tx.send_replace(self.running_symbols());
    }

    /// 실행 중인 엔진과 보관 상태의 세션을 초기화합니다.
    pub fn reset_sessions(&mut self) -> usize {
        let mut count = 0;

        for (symbol, engine) in &self.running {
            if engine.reset_session() {
                count += 1;
            } else {
                warn!(symbol = %symbol, "Engine did not accept session reset");
            }
        }
        for retained in self.retained.values_mut() {
            retained.state.reset_session();
            count += 1;
        }

        info!(symbols = count, "Session reset requested");
        count
    }

    fn handle_command(&mut self, command: LifecycleCommand) {
        match command {
            LifecycleCommand::ResetSessions { reply } => {
                let count = self.reset_sessions();
                let _ = reply.send(count);
            }
        }
    }

    /// 실행 중인 엔진을 모두 정지합니다.
    pub async fn stop_all(&mut self) {
        for (symbol, engine) in self.running.drain() {
            if let Some(state) = engine.stop().await {
                self.retained.insert(
                    symbol,
                    RetainedState {
                        state,
                        since: Instant::now(),
                    },
                );
            }
        }
        self.publish_running();
    }

    /// 종료 신호까지 주기적으로 수요를 조정합니다.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = interval(self.settings.reconcile_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            provider = self.provider.name(),
            period_ms = self.settings.reconcile_interval.as_millis() as u64,
            grace_secs = self.settings.grace_period.as_secs(),
            "Lifecycle controller started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                Some(command) = self.commands.recv() => self.handle_command(command),

                _ = ticker.tick() => {
                    let report = self.reconcile().await;
                    if !report.is_empty() {
                        info!(
                            started = ?report.started,
                            resumed = ?report.resumed,
                            stopped = ?report.stopped,
                            purged = ?report.purged,
                            failed = ?report.failed,
                            crashed = ?report.crashed,
                            "Demand reconciled"
                        );
                    }
                }
            }
        }

        self.stop_all().await;
        info!("Lifecycle controller stopped");
    }
}

/// 컨트롤러를 백그라운드로 시작.
pub fn start_lifecycle(
    controller: LifecycleController,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(controller.run(shutdown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::{
        create_registry, BroadcastReport, ConnectionHandle, ConnectionId, Outbound,
        RegistryLimits,
    };
    use async_trait::async_trait;
    use ticker_core::TickData;
    use ticker_data::StaticSeedProvider;

    struct PanickingBroadcaster;

    #[async_trait]
    impl TickBroadcaster for PanickingBroadcaster {
        async fn broadcast(&self, symbol: &str, _tick: &TickData) -> BroadcastReport {
            panic!("broadcast failed for {symbol}");
        }
    }

    fn settings() -> LifecycleSettings {
        LifecycleSettings {
            tick_interval: Duration::from_secs(4),
            reconcile_interval: Duration::from_secs(5),
            grace_period: Duration::from_secs(300),
        }
    }

    async fn setup(
        provider: StaticSeedProvider,
    ) -> (
        LifecycleController,
        LifecycleHandle,
        SharedRegistry,
        Arc<StaticSeedProvider>,
        ConnectionId,
        mpsc::Receiver<Outbound>,
    ) {
        let registry = create_registry(RegistryLimits::default());
        let provider = Arc::new(provider);
        let (controller, handle) =
            LifecycleController::new(registry.clone(), provider.clone(), settings());

        let (conn, rx) = ConnectionHandle::channel(64);
        let id = registry.admit(conn).await;

        (controller, handle, registry, provider, id, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_starts_engine_on_demand() {
        let (mut controller, handle, registry, provider, id, mut rx) =
            setup(StaticSeedProvider::new().with_price("TSLA", 250.0)).await;

        assert!(controller.reconcile().await.is_empty());

        registry.subscribe(id, "tsla").await.unwrap();
        let report = controller.reconcile().await;

        assert_eq!(report.started, vec!["TSLA"]);
        assert_eq!(provider.fetch_count(), 1);
        assert!(handle.running_symbols().contains("TSLA"));
        assert_eq!(handle.running_count(), 1);

        // 첫 틱은 즉시 전송
        let Some(Outbound::Text(text)) = rx.recv().await else {
            panic!("expected price update");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "price_update");
        assert_eq!(value["symbol"], "TSLA");

        // 이미 실행 중이면 재시작하지 않음
        assert!(controller.reconcile().await.is_empty());
        controller.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_within_grace_without_fetch() {
        let (mut controller, _handle, registry, provider, id, _rx) =
            setup(StaticSeedProvider::new().with_price("AAPL", 190.0)).await;

        registry.subscribe(id, "AAPL").await.unwrap();
        controller.reconcile().await;

        registry.unsubscribe(id, "AAPL").await.unwrap();
        let report = controller.reconcile().await;
        assert_eq!(report.stopped, vec!["AAPL"]);
        assert!(controller.running_symbols().is_empty());
        assert!(controller.retained_symbols().contains("AAPL"));

        tokio::time::advance(Duration::from_secs(120)).await;

        registry.subscribe(id, "AAPL").await.unwrap();
        let report = controller.reconcile().await;
        assert_eq!(report.resumed, vec!["AAPL"]);
        assert!(report.started.is_empty());
        assert_eq!(provider.fetch_count(), 1);
        assert!(controller.retained_symbols().is_empty());

        controller.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_after_grace_then_refetch() {
        let (mut controller, _handle, registry, provider, id, _rx) =
            setup(StaticSeedProvider::new().with_price("MSFT", 410.0)).await;

        registry.subscribe(id, "MSFT").await.unwrap();
        controller.reconcile().await;
        registry.remove(id).await;
        controller.reconcile().await;

        tokio::time::advance(Duration::from_secs(301)).await;

        let report = controller.reconcile().await;
        assert_eq!(report.purged, vec!["MSFT"]);
        assert!(controller.retained_symbols().is_empty());

        let (conn, _rx2) = ConnectionHandle::channel(8);
        let other = registry.admit(conn).await;
        registry.subscribe(other, "MSFT").await.unwrap();

        let report = controller.reconcile().await;
        assert_eq!(report.started, vec!["MSFT"]);
        assert_eq!(provider.fetch_count(), 2);

        controller.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_seed_failure_retried_next_poll() {
        let (mut controller, handle, registry, provider, id, _rx) =
            setup(StaticSeedProvider::new()).await;

        registry.subscribe(id, "NOPE").await.unwrap();

        let report = controller.reconcile().await;
        assert_eq!(report.failed, vec!["NOPE"]);
        assert!(handle.running_symbols().is_empty());

        let report = controller.reconcile().await;
        assert_eq!(report.failed, vec!["NOPE"]);
        assert_eq!(provider.fetch_count(), 2);

        // 수요가 사라지면 더 이상 조회하지 않음
        registry.unsubscribe(id, "NOPE").await.unwrap();
        assert!(controller.reconcile().await.is_empty());
        assert_eq!(provider.fetch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_seeding_in_one_poll() {
        let provider = StaticSeedProvider::new()
            .with_price("AAPL", 190.0)
            .with_price("NVDA", 480.0);
        let (mut controller, _handle, registry, provider, id, _rx) = setup(provider).await;

        for symbol in ["AAPL", "NVDA", "ZZZZ"] {
            registry.subscribe(id, symbol).await.unwrap();
        }

        let mut report = controller.reconcile().await;
        report.started.sort();
        assert_eq!(report.started, vec!["AAPL", "NVDA"]);
        assert_eq!(report.failed, vec!["ZZZZ"]);
        assert_eq!(provider.fetch_count(), 3);

        controller.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_reset_sessions_and_shutdown() {
        let (controller, handle, registry, _provider, id, _rx) =
            setup(StaticSeedProvider::new().with_price("AMZN", 180.0)).await;
        registry.subscribe(id, "AMZN").await.unwrap();

        let shutdown = CancellationToken::new();
        let task = start_lifecycle(controller, shutdown.clone());

        let mut running = handle.watch_running();
        running
            .wait_for(|symbols| symbols.contains("AMZN"))
            .await
            .unwrap();

        assert_eq!(handle.reset_sessions().await, Ok(1));

        shutdown.cancel();
        task.await.unwrap();

        assert!(handle.running_symbols().is_empty());
        assert_eq!(
            handle.reset_sessions().await,
            Err(LifecycleError::Unavailable)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashed_engine_restarted_on_next_poll() {
        let (mut controller, handle, registry, provider, id, mut rx) =
            setup(StaticSeedProvider::new().with_price("META", 500.0)).await;
        registry.subscribe(id, "META").await.unwrap();

        let state = SimulationState::with_price("META", 500.0, 0.02);
        let engine = EngineHandle::spawn(
            state,
            Arc::new(PanickingBroadcaster),
            settings().tick_interval,
        );
        controller.running.insert("META".to_string(), engine);

        while !controller.running["META"].is_finished() {
            tokio::task::yield_now().await;
        }

        let report = controller.reconcile().await;
        assert_eq!(report.crashed, vec!["META"]);
        assert_eq!(report.started, vec!["META"]);
        assert_eq!(provider.fetch_count(), 1);
        assert!(handle.running_symbols().contains("META"));
        assert!(!controller.running["META"].is_finished());

        // 재시작된 엔진은 레지스트리로 틱을 보냄
        let Some(Outbound::Text(text)) = rx.recv().await else {
            panic!("expected price update");
        };
        assert!(text.contains("\"symbol\":\"META\""));

        controller.stop_all().await;
    }
}
