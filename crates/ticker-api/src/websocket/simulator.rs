//! 가격 시뮬레이션 엔진.
//!
//! 심볼마다 하나의 엔진 태스크가 자신의 [`SimulationState`]를 소유하고
//! 고정 주기로 기하 브라운 운동 근사 틱을 만들어 [`TickBroadcaster`]로 보냅니다.
//!
//! # 틱 계산
//!
//! ```text
//! z         = Box-Muller(u1, u2),  u1, u2 ∈ (0, 1]
//! dt        = interval_secs / (390 * 60)
//! increment = clamp(price * volatility * z * sqrt(dt), ±2% of price)
//! ```
//!
//! 엔진은 취소 토큰으로 멈추며, 멈출 때 상태를 돌려주므로
//! 수명주기 컨트롤러가 유예 기간 동안 보관했다가 재개할 수 있습니다.

use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::ToPrimitive;
use ticker_core::{round2, Candle, TickData};
use ticker_data::DataError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::connection::TickBroadcaster;
use crate::metrics::record_tick;

/// 하루 거래 시간 (분).
pub const TRADING_MINUTES_PER_DAY: f64 = 390.0;

/// 틱 1회 최대 변동폭 (현재가 대비).
pub const MAX_STEP_FRACTION: f64 = 0.02;

/// 수익률 표본이 부족할 때의 기본 변동성.
pub const DEFAULT_VOLATILITY: f64 = 0.015;

/// 변동성 하한.
pub const MIN_VOLATILITY: f64 = 0.005;

/// 변동성 추정에 사용하는 일간 수익률 수.
pub const VOLATILITY_WINDOW: usize = 20;

const VOLUME_STEP: std::ops::Range<u64> = 1_000..10_000;

const COMMAND_BUFFER: usize = 8;

/// 틱 주기를 거래일 대비 비율로 변환합니다.
pub fn trading_day_fraction(interval: Duration) -> f64 {
    interval.as_secs_f64() / (TRADING_MINUTES_PER_DAY * 60.0)
}

/// Box-Muller 변환으로 표준정규 난수 하나를 뽑습니다.
pub fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    // gen::<f64>()는 [0, 1)이므로 뒤집어서 (0, 1]
    let u1 = 1.0 - rng.gen::<f64>();
    let u2 = 1.0 - rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// 최근 종가(최신 순)에서 일간 변동성을 추정합니다.
///
/// 최근 21개 종가의 일간 수익률 20개로 표본 표준편차를 구하고 하한을 적용합니다.
/// 수익률이 20개 미만이면 [`DEFAULT_VOLATILITY`]를 사용합니다.
pub fn estimate_volatility(candles: &[Candle]) -> f64 {
    let closes: Vec<f64> = candles
        .iter()
        .take(VOLATILITY_WINDOW + 1)
        .filter_map(|candle| candle.close.to_f64())
        .collect();

    let returns: Vec<f64> = closes
        .windows(2)
        .filter(|pair| pair[1] > 0.0)
        .map(|pair| (pair[0] - pair[1]) / pair[1])
        .collect();

    if returns.len() < VOLATILITY_WINDOW {
        return DEFAULT_VOLATILITY;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);

    variance.sqrt().max(MIN_VOLATILITY)
}

// ==================== 시뮬레이션 상태 ====================

/// 심볼별 시뮬레이션 상태.
///
/// 불변식: `high >= current_price >= low >= 0`, `volatility > 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationState {
    symbol: String,
    base_price: f64,
    current_price: f64,
    open: f64,
    high: f64,
    low: f64,
    volume: u64,
    last_update: DateTime<Utc>,
    volatility: f64,
}

impl SimulationState {
    /// 일봉 시계열(최신 순)로 초기 상태를 만듭니다.
    ///
    /// # Errors
    ///
    /// - [`DataError::DataUnavailable`]: 빈 시계열
    /// - [`DataError::Parse`]: 최신 종가가 양수가 아님
    pub fn seed(symbol: &str, candles: &[Candle]) -> Result<Self, DataError> {
        let latest = candles
            .first()
            .ok_or_else(|| DataError::DataUnavailable(format!("{}: empty seed series", symbol)))?;

        let base_price = latest
            .close
            .to_f64()
            .filter(|price| price.is_finite() && *price > 0.0)
            .ok_or_else(|| {
                DataError::Parse(format!("{}: invalid close {}", symbol, latest.close))
            })?;

        Ok(Self::with_price(symbol, base_price, estimate_volatility(candles)))
    }

    /// 기준 가격과 변동성으로 상태를 만듭니다.
    pub fn with_price(symbol: impl Into<String>, price: f64, volatility: f64) -> Self {
        let price = price.max(0.0);
        Self {
            symbol: symbol.into(),
            base_price: price,
            current_price: price,
            open: price,
            high: price,
            low: price,
            volume: 0,
            last_update: Utc::now(),
            volatility: if volatility > 0.0 {
                volatility
            } else {
                DEFAULT_VOLATILITY
            },
        }
    }

    /// 난수로 틱 하나를 진행합니다.
    pub fn step<R: Rng>(&mut self, rng: &mut R, dt: f64) -> TickData {
        let z = standard_normal(rng);
        let volume = rng.gen_range(VOLUME_STEP);
        self.apply_shock(z, dt, volume)
    }

    /// 주어진 표준정규 값과 거래량 증분으로 틱 하나를 진행합니다.
    pub fn apply_shock(&mut self, z: f64, dt: f64, volume: u64) -> TickData {
        let limit = self.current_price * MAX_STEP_FRACTION;
        let raw = self.current_price * self.volatility * z * dt.max(0.0).sqrt();
        let increment = if raw.is_finite() {
            raw.clamp(-limit, limit)
        } else {
            0.0
        };

        self.current_price = (self.current_price + increment).max(0.0);
        self.high = self.high.max(self.current_price);
        self.low = self.low.min(self.current_price);
        self.volume = self.volume.saturating_add(volume);
        self.last_update = Utc::now();

        self.tick_data()
    }

    /// 세션 초기화: 시가/고가/저가를 현재가로, 거래량을 0으로.
    pub fn reset_session(&mut self) {
        self.open = self.current_price;
        self.high = self.current_price;
        self.low = self.current_price;
        self.volume = 0;
        self.last_update = Utc::now();
    }

    /// 현재 상태의 틱 페이로드.
    pub fn tick_data(&self) -> TickData {
        let change = self.current_price - self.open;
        let change_percent = if self.open > 0.0 {
            change / self.open * 100.0
        } else {
            0.0
        };

        TickData {
            price: round2(self.current_price),
            change: round2(change),
            change_percent: round2(change_percent),
            volume: self.volume,
            timestamp: self.last_update,
            open: Some(round2(self.open)),
            high: Some(round2(self.high)),
            low: Some(round2(self.low)),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn base_price(&self) -> f64 {
        self.base_price
    }

    pub fn current_price(&self) -> f64 {
        self.current_price
    }

    pub fn open(&self) -> f64 {
        self.open
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn volume(&self) -> u64 {
        self.volume
    }

    pub fn volatility(&self) -> f64 {
        self.volatility
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }
}

// ==================== 엔진 액터 ====================

/// 실행 중인 엔진에 보내는 명령.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    /// 세션 시가/고가/저가/거래량 초기화
    ResetSession,
}

/// 심볼 하나를 구동하는 엔진 태스크.
pub struct SimulationEngine {
    state: SimulationState,
    broadcaster: Arc<dyn TickBroadcaster>,
    interval: Duration,
    commands: mpsc::Receiver<EngineCommand>,
    cancel: CancellationToken,
}

impl SimulationEngine {
    /// 취소되거나 명령 채널이 닫힐 때까지 틱을 생성합니다.
    ///
    /// 첫 틱은 시작 즉시 전송됩니다.
    pub async fn run(mut self) -> SimulationState {
        let symbol = self.state.symbol.clone();
        let dt = trading_day_fraction(self.interval);
        let mut rng = StdRng::from_entropy();

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            symbol = %symbol,
            price = self.state.current_price,
            volatility = self.state.volatility,
            "Simulation engine started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                command = self.commands.recv() => match command {
                    Some(EngineCommand::ResetSession) => {
                        self.state.reset_session();
                        debug!(symbol = %symbol, "Session reset");
                    }
                    None => break,
                },

                _ = ticker.tick() => {
                    let tick = self.state.step(&mut rng, dt);

                    // 계산 도중 취소되었으면 전송하지 않음
                    if self.cancel.is_cancelled() {
                        break;
                    }

                    let report = self.broadcaster.broadcast(&symbol, &tick).await;
                    record_tick(&symbol);
                    trace!(
                        symbol = %symbol,
                        price = tick.price,
                        recipients = report.recipients(),
                        delivered = report.delivered,
                        dropped = report.dropped,
                        "Tick broadcast"
                    );
                }
            }
        }

        info!(symbol = %symbol, price = self.state.current_price, "Simulation engine stopped");
        self.state
    }
}

/// 실행 중인 엔진 핸들.
#[derive(Debug)]
pub struct EngineHandle {
    symbol: String,
    cancel: CancellationToken,
    commands: mpsc::Sender<EngineCommand>,
    task: JoinHandle<SimulationState>,
}

impl EngineHandle {
    /// 상태를 소유하는 엔진 태스크를 시작합니다.
    pub fn spawn(
        state: SimulationState,
        broadcaster: Arc<dyn TickBroadcaster>,
        interval: Duration,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let cancel = CancellationToken::new();
        let symbol = state.symbol.clone();

        let engine = SimulationEngine {
            state,
            broadcaster,
            interval: interval.max(Duration::from_millis(1)),
            commands: command_rx,
            cancel: cancel.clone(),
        };

        Self {
            symbol,
            cancel,
            commands,
            task: tokio::spawn(engine.run()),
        }
    }

    /// 구동 중인 심볼.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// 세션 초기화 요청. 명령 큐가 가득 찼거나 엔진이 끝났으면 `false`.
    pub fn reset_session(&self) -> bool {
        self.commands.try_send(EngineCommand::ResetSession).is_ok()
    }

    /// 엔진 태스크가 종료되었는지 여부.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// 엔진을 멈추고 상태를 회수합니다.
    ///
    /// 태스크가 패닉으로 끝났으면 `None`.
    pub async fn stop(self) -> Option<SimulationState> {
        self.cancel.cancel();
        match self.task.await {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "Simulation engine task failed");
                None
            }
        }
    }
}
