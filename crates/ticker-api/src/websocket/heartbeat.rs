//! 하트비트 모니터.
//!
//! 고정 주기로 모든 연결을 검사합니다.
//!
//! 1. 지난 프로브 이후 응답이 없던 연결은 퇴출합니다. 퇴출 시 연결의 종료 토큰이
//!    취소되므로 송신 큐가 가득 차 있어도 writer는 Close 프레임을 보냅니다.
//! 2. 나머지는 활성 플래그를 내리고 ping 프로브를 큐에 넣습니다.
//! 3. writer가 이미 종료되어 프로브를 넣을 수 없으면 즉시 퇴출합니다.
//!
//! 즉, 한 주기 안에 pong(또는 JSON `pong`/`heartbeat`)이 오지 않으면
//! 다음 주기에 제거됩니다.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::connection::{Connection, ConnectionId, Outbound, SendFailure, SharedRegistry};
use crate::metrics::record_heartbeat_evictions;

/// 퇴출 사유.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictReason {
    /// 지난 프로브에 응답 없음
    Unresponsive,
    /// writer 태스크 종료
    WriterGone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeOutcome {
    Probed,
    /// 송신 큐가 가득 차 프로브를 넣지 못함
    Backlogged,
    Evict(EvictReason),
}

fn probe(connection: &mut Connection) -> ProbeOutcome {
    if !connection.alive {
        return ProbeOutcome::Evict(EvictReason::Unresponsive);
    }

    connection.alive = false;
    match connection.handle.try_send(Outbound::Ping) {
        Ok(()) => ProbeOutcome::Probed,
        Err(SendFailure::Full) => ProbeOutcome::Backlogged,
        Err(SendFailure::Closed) => ProbeOutcome::Evict(EvictReason::WriterGone),
    }
}

/// 검사 1회 결과.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// 프로브를 보낸 연결 수
    pub probed: usize,
    /// 큐가 가득 차 프로브를 넣지 못한 연결 수
    pub backlogged: usize,
    /// 퇴출된 연결
    pub evicted: Vec<ConnectionId>,
}

/// 하트비트 모니터.
pub struct HeartbeatMonitor {
    registry: SharedRegistry,
    period: Duration,
}

impl HeartbeatMonitor {
    /// 새 모니터 생성.
    pub fn new(registry: SharedRegistry, period: Duration) -> Self {
        Self {
            registry,
            period: period.max(Duration::from_millis(1)),
        }
    }

    /// 모든 연결을 한 번 검사합니다.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        let detached = self
            .registry
            .retain_with(|id, connection| match probe(connection) {
                ProbeOutcome::Probed => {
                    report.probed += 1;
                    true
                }
                ProbeOutcome::Backlogged => {
                    debug!(connection_id = %id, "Probe skipped, outbound queue full");
                    report.backlogged += 1;
                    true
                }
                ProbeOutcome::Evict(reason) => {
                    debug!(connection_id = %id, ?reason, "Evicting connection");
                    false
                }
            })
            .await;

        for connection in detached {
            info!(
                connection_id = %connection.id,
                symbols = connection.symbols.len(),
                "Evicted unresponsive connection"
            );
            report.evicted.push(connection.id);
        }

        record_heartbeat_evictions(report.evicted.len());
        report
    }

    /// 종료 신호까지 주기적으로 검사합니다. 첫 검사는 한 주기 뒤에 실행됩니다.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(period_ms = self.period.as_millis() as u64, "Heartbeat monitor started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.sweep().await;
                    debug!(
                        probed = report.probed,
                        backlogged = report.backlogged,
                        evicted = report.evicted.len(),
                        "Heartbeat sweep completed"
                    );
                }
            }
        }

        info!("Heartbeat monitor stopped");
    }
}

/// 하트비트 모니터를 백그라운드로 시작.
pub fn start_heartbeat(
    registry: SharedRegistry,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let monitor = HeartbeatMonitor::new(registry, period);
    tokio::spawn(monitor.run(shutdown))
}
