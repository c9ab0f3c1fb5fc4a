//! WebSocket 연결 레지스트리.
//!
//! 연결 맵과 심볼 구독 인덱스를 하나의 `RwLock` 아래 둡니다.
//! 모든 변경은 같은 쓰기 가드 안에서 두 구조를 함께 갱신하므로,
//! 연결의 심볼 집합과 역인덱스는 항상 일치합니다.
//!
//! 브로드캐스트는 읽기 가드만 잡고 `try_send`로 각 연결의 송신 큐에 넣습니다.
//! 큐가 가득 찬 소비자에게는 해당 틱을 버리고, 브로드캐스트 경로에서는
//! 연결을 제거하지 않습니다.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use ticker_core::{StreamConfig, Symbol, SymbolError, TickData, MAX_SYMBOL_LEN};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::messages::{ClientMessage, ErrorCode, ServerMessage, WsError};
use super::subscriptions::SubscriptionIndex;
use crate::metrics::{record_broadcast_dropped, record_broadcast_failed};

/// 연결 ID (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// 새 ID 발급.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ==================== 송신 핸들 ====================

/// 연결의 writer 태스크로 보내는 프레임.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// 직렬화된 서버 메시지 (모든 수신자가 같은 버퍼를 공유)
    Text(Arc<str>),
    /// 전송 계층 ping 프로브
    Ping,
}

/// 송신 큐 적재 실패.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    /// 큐가 가득 참 (느린 소비자)
    Full,
    /// writer가 종료됨
    Closed,
}

/// 연결별 송신 핸들 (bounded mpsc).
///
/// 큐와 별도로 종료 토큰을 갖습니다. 레지스트리에서 떼어내면 토큰이 취소되고,
/// writer는 큐에 남은 프레임과 상관없이 Close 프레임을 보내고 끝납니다.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    tx: mpsc::Sender<Outbound>,
    closing: CancellationToken,
}

impl ConnectionHandle {
    /// 지정한 크기의 송신 큐와 수신기를 생성합니다.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            tx,
            closing: CancellationToken::new(),
        };
        (handle, rx)
    }

    /// writer가 기다릴 종료 토큰.
    pub fn closing_token(&self) -> CancellationToken {
        self.closing.clone()
    }

    fn close(&self) {
        self.closing.cancel();
    }

    /// 블로킹 없이 프레임을 큐에 넣습니다.
    pub fn try_send(&self, frame: Outbound) -> Result<(), SendFailure> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SendFailure::Full,
            TrySendError::Closed(_) => SendFailure::Closed,
        })
    }

    /// 서버 메시지를 직렬화해 큐에 넣습니다.
    pub fn send_message(&self, message: &ServerMessage) -> Result<(), SendFailure> {
        match message.to_json() {
            Ok(json) => self.try_send(Outbound::Text(Arc::from(json))),
            Err(e) => {
                warn!(error = %e, "Failed to serialize server message");
                Ok(())
            }
        }
    }
}

/// 레지스트리에 등록된 연결.
#[derive(Debug)]
pub struct Connection {
    pub(crate) handle: ConnectionHandle,
    pub(crate) symbols: BTreeSet<String>,
    pub(crate) alive: bool,
}

impl Connection {
    fn new(handle: ConnectionHandle) -> Self {
        Self {
            handle,
            symbols: BTreeSet::new(),
            alive: true,
        }
    }

    /// 마지막 프로브 이후 응답이 있었는지 여부.
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// 구독 중인 심볼.
    pub fn symbols(&self) -> &BTreeSet<String> {
        &self.symbols
    }
}

/// 레지스트리에서 떼어낸 연결.
#[derive(Debug)]
pub struct DetachedConnection {
    /// 연결 ID
    pub id: ConnectionId,
    /// 송신 핸들 (이미 종료 토큰이 취소된 상태)
    pub handle: ConnectionHandle,
    /// 제거 시점의 구독 심볼
    pub symbols: BTreeSet<String>,
}

// ==================== 결과 타입 ====================

/// 구독 요청 에러.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    #[error("invalid symbol: {0}")]
    InvalidSymbol(#[from] SymbolError),
    #[error("subscription limit exceeded: at most {max} symbols per connection")]
    LimitExceeded { max: usize },
    #[error("unknown connection")]
    UnknownConnection,
}

/// 구독 변경 결과.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionChange {
    /// 정규화된 심볼
    pub symbol: Symbol,
    /// 실제로 상태가 바뀌었는지 여부 (중복 요청이면 `false`)
    pub changed: bool,
}

/// 수신 메시지 처리 결과 (로그용).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    Subscribed(SubscriptionChange),
    Unsubscribed(SubscriptionChange),
    Heartbeat,
    Pong,
    /// 클라이언트에게 `error` 메시지를 보낸 경우
    Rejected(String),
    /// 이미 제거된 연결
    UnknownConnection,
}

/// 브로드캐스트 결과.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// 큐에 적재된 수
    pub delivered: usize,
    /// 큐가 가득 차 버려진 수
    pub dropped: usize,
    /// 큐가 닫혀 실패한 수
    pub failed: usize,
}

impl BroadcastReport {
    /// 전송 시도 대상 수.
    pub fn recipients(&self) -> usize {
        self.delivered + self.dropped + self.failed
    }
}

/// 틱 배포 경계.
///
/// 가격 생성 측(시뮬레이션 엔진 또는 실제 시세 어댑터)은 이 트레이트만 알면 됩니다.
#[async_trait]
pub trait TickBroadcaster: Send + Sync {
    /// 심볼 구독자 전원에게 틱을 전송합니다.
    async fn broadcast(&self, symbol: &str, tick: &TickData) -> BroadcastReport;
}

/// 심볼별 구독자 수.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolStats {
    pub symbol: String,
    pub subscribers: usize,
}

/// 레지스트리 통계.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// 연결 수
    pub connections: usize,
    /// 심볼별 구독자 수 (심볼 오름차순)
    pub symbols: Vec<SymbolStats>,
}

/// 레지스트리 한도.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryLimits {
    /// 연결당 최대 구독 수
    pub max_subscriptions: usize,
    /// 심볼 최대 길이
    pub max_symbol_len: usize,
}

impl Default for RegistryLimits {
    fn default() -> Self {
        Self {
            max_subscriptions: 50,
            max_symbol_len: MAX_SYMBOL_LEN,
        }
    }
}

impl From<&StreamConfig> for RegistryLimits {
    fn from(config: &StreamConfig) -> Self {
        Self {
            max_subscriptions: config.max_subscriptions,
            max_symbol_len: config.max_symbol_len,
        }
    }
}

// ==================== 레지스트리 ====================

#[derive(Debug, Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, Connection>,
    index: SubscriptionIndex,
}

impl RegistryState {
    /// 연결과 모든 역인덱스 항목을 함께 제거하고 writer에 종료를 알립니다.
    fn detach(&mut self, id: ConnectionId) -> Option<DetachedConnection> {
        let connection = self.connections.remove(&id)?;
        for symbol in &connection.symbols {
            self.index.remove(symbol, &id);
        }
        connection.handle.close();
        Some(DetachedConnection {
            id,
            handle: connection.handle,
            symbols: connection.symbols,
        })
    }
}

/// 연결 레지스트리.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
    limits: RegistryLimits,
}

/// 공유 가능한 레지스트리 타입.
pub type SharedRegistry = Arc<ConnectionRegistry>;

/// 새로운 공유 레지스트리 생성.
pub fn create_registry(limits: RegistryLimits) -> SharedRegistry {
    Arc::new(ConnectionRegistry::new(limits))
}

impl ConnectionRegistry {
    /// 새 레지스트리 생성.
    pub fn new(limits: RegistryLimits) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            limits,
        }
    }

    /// 적용 중인 한도.
    pub fn limits(&self) -> RegistryLimits {
        self.limits
    }

    /// 새 연결 등록 (구독 없음, 활성 상태).
    pub async fn admit(&self, handle: ConnectionHandle) -> ConnectionId {
        let id = ConnectionId::new();
        self.state
            .write()
            .await
            .connections
            .insert(id, Connection::new(handle));
        id
    }

    /// 수신한 텍스트 프레임을 디코딩하고 처리합니다.
    ///
    /// 프로토콜 오류는 해당 연결에만 `error` 메시지로 알립니다.
    pub async fn handle_inbound(&self, id: ConnectionId, raw: &str) -> InboundOutcome {
        let message = match ClientMessage::from_json(raw) {
            Ok(message) => message,
            Err(e) => return self.reject(id, &e).await,
        };

        match message {
            ClientMessage::Subscribe { symbol } => match self.subscribe(id, &symbol).await {
                Ok(change) => InboundOutcome::Subscribed(change),
                Err(e) => self.reject_symbol(id, &symbol, e).await,
            },
            ClientMessage::Unsubscribe { symbol } => match self.unsubscribe(id, &symbol).await {
                Ok(change) => InboundOutcome::Unsubscribed(change),
                Err(e) => self.reject_symbol(id, &symbol, e).await,
            },
            ClientMessage::Heartbeat => {
                if !self.mark_alive(id).await {
                    return InboundOutcome::UnknownConnection;
                }
                self.send_to(id, &ServerMessage::Pong).await;
                InboundOutcome::Heartbeat
            }
            ClientMessage::Pong => {
                if !self.mark_alive(id).await {
                    return InboundOutcome::UnknownConnection;
                }
                InboundOutcome::Pong
            }
        }
    }

    /// 디코딩 오류를 클라이언트에 알립니다.
    pub async fn reject(&self, id: ConnectionId, error: &WsError) -> InboundOutcome {
        let message = error.to_string();
        debug!(connection_id = %id, error = %message, "Rejected client message");

        if self
            .send_to(id, &ServerMessage::error(error.code(), message.clone()))
            .await
        {
            InboundOutcome::Rejected(message)
        } else {
            InboundOutcome::UnknownConnection
        }
    }

    async fn reject_symbol(
        &self,
        id: ConnectionId,
        raw_symbol: &str,
        error: SubscriptionError,
    ) -> InboundOutcome {
        let code = match error {
            SubscriptionError::InvalidSymbol(_) => ErrorCode::InvalidSymbol,
            SubscriptionError::LimitExceeded { .. } => ErrorCode::SubscriptionLimitExceeded,
            SubscriptionError::UnknownConnection => return InboundOutcome::UnknownConnection,
        };

        let message = error.to_string();
        debug!(connection_id = %id, symbol = %raw_symbol, error = %message, "Rejected subscription request");

        let reply =
            ServerMessage::symbol_error(code, raw_symbol.trim().to_uppercase(), message.clone());
        self.send_to(id, &reply).await;
        InboundOutcome::Rejected(message)
    }

    /// 연결 하나에 메시지를 보냅니다.
    ///
    /// # Returns
    ///
    /// 연결이 등록되어 있으면 `true` (큐 적재 성공 여부와 무관)
    pub async fn send_to(&self, id: ConnectionId, message: &ServerMessage) -> bool {
        let state = self.state.read().await;
        let Some(connection) = state.connections.get(&id) else {
            return false;
        };

        if let Err(failure) = connection.handle.send_message(message) {
            debug!(connection_id = %id, ?failure, kind = message.kind().as_str(), "Reply not queued");
        }
        true
    }

    /// 활성 플래그 설정 (전송 계층 pong 또는 JSON pong/heartbeat).
    pub async fn mark_alive(&self, id: ConnectionId) -> bool {
        match self.state.write().await.connections.get_mut(&id) {
            Some(connection) => {
                connection.alive = true;
                true
            }
            None => false,
        }
    }

    /// 심볼 구독.
    ///
    /// 심볼은 공백 제거 후 대문자로 정규화됩니다. 이미 구독 중이면 변경 없이 성공합니다.
    ///
    /// # Errors
    ///
    /// - [`SubscriptionError::InvalidSymbol`]: 빈 문자열, 길이 초과, 허용되지 않는 문자
    /// - [`SubscriptionError::LimitExceeded`]: 새 심볼인데 이미 한도만큼 구독 중
    /// - [`SubscriptionError::UnknownConnection`]: 등록되지 않은 연결
    pub async fn subscribe(
        &self,
        id: ConnectionId,
        raw_symbol: &str,
    ) -> Result<SubscriptionChange, SubscriptionError> {
        let symbol = Symbol::parse_with_limit(raw_symbol, self.limits.max_symbol_len)?;

        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let connection = state
            .connections
            .get_mut(&id)
            .ok_or(SubscriptionError::UnknownConnection)?;

        if connection.symbols.contains(symbol.as_str()) {
            return Ok(SubscriptionChange {
                symbol,
                changed: false,
            });
        }
        if connection.symbols.len() >= self.limits.max_subscriptions {
            return Err(SubscriptionError::LimitExceeded {
                max: self.limits.max_subscriptions,
            });
        }

        connection.symbols.insert(symbol.as_str().to_string());
        state.index.insert(symbol.as_str(), id);

        debug!(connection_id = %id, symbol = %symbol, "Subscribed");
        Ok(SubscriptionChange {
            symbol,
            changed: true,
        })
    }

    /// 심볼 구독 해제. 구독 중이 아니어도 성공합니다.
    pub async fn unsubscribe(
        &self,
        id: ConnectionId,
        raw_symbol: &str,
    ) -> Result<SubscriptionChange, SubscriptionError> {
        let symbol = Symbol::parse_with_limit(raw_symbol, self.limits.max_symbol_len)?;

        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let connection = state
            .connections
            .get_mut(&id)
            .ok_or(SubscriptionError::UnknownConnection)?;

        let changed = connection.symbols.remove(symbol.as_str());
        state.index.remove(symbol.as_str(), &id);

        if changed {
            debug!(connection_id = %id, symbol = %symbol, "Unsubscribed");
        }
        Ok(SubscriptionChange { symbol, changed })
    }

    /// 연결 제거 (멱등).
    ///
    /// # Returns
    ///
    /// 제거된 연결의 구독 심볼, 이미 없으면 `None`
    pub async fn remove(&self, id: ConnectionId) -> Option<BTreeSet<String>> {
        let detached = self.state.write().await.detach(id)?;
        Some(detached.symbols)
    }

    /// 쓰기 가드 하나 안에서 모든 연결을 검사하고, `keep`이 `false`를 반환한 연결을 떼어냅니다.
    pub(crate) async fn retain_with<F>(&self, mut keep: F) -> Vec<DetachedConnection>
    where
        F: FnMut(&ConnectionId, &mut Connection) -> bool,
    {
        let mut state = self.state.write().await;

        let doomed: Vec<ConnectionId> = state
            .connections
            .iter_mut()
            .filter_map(|(id, connection)| (!keep(id, connection)).then_some(*id))
            .collect();

        doomed
            .into_iter()
            .filter_map(|id| state.detach(id))
            .collect()
    }

    /// 심볼 구독자에게 틱 전송.
    ///
    /// 메시지는 한 번만 직렬화되어 모든 수신자가 같은 버퍼를 공유합니다.
    pub async fn broadcast_tick(&self, symbol: &str, tick: &TickData) -> BroadcastReport {
        let state = self.state.read().await;
        let Some(members) = state.index.subscribers(symbol) else {
            return BroadcastReport::default();
        };

        let message = ServerMessage::PriceUpdate {
            symbol: symbol.to_string(),
            data: tick.clone(),
        };
        let text: Arc<str> = match message.to_json() {
            Ok(json) => Arc::from(json),
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Failed to serialize tick");
                return BroadcastReport::default();
            }
        };

        let mut report = BroadcastReport::default();
        for id in members {
            let Some(connection) = state.connections.get(id) else {
                continue;
            };
            match connection.handle.try_send(Outbound::Text(Arc::clone(&text))) {
                Ok(()) => report.delivered += 1,
                Err(SendFailure::Full) => report.dropped += 1,
                Err(SendFailure::Closed) => report.failed += 1,
            }
        }
        drop(state);

        if report.dropped > 0 || report.failed > 0 {
            debug!(
                symbol = %symbol,
                dropped = report.dropped,
                failed = report.failed,
                "Tick not delivered to every subscriber"
            );
        }
        record_broadcast_dropped(report.dropped);
        record_broadcast_failed(report.failed);

        report
    }

    // ==================== 조회 ====================

    /// 구독자가 1명 이상인 심볼.
    pub async fn active_symbols(&self) -> BTreeSet<String> {
        self.state.read().await.index.active_symbols()
    }

    /// 심볼의 구독자 수.
    pub async fn subscriber_count(&self, symbol: &str) -> usize {
        self.state.read().await.index.subscriber_count(symbol)
    }

    /// 연결 수.
    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    /// 연결의 구독 심볼.
    pub async fn subscriptions_of(&self, id: ConnectionId) -> Option<BTreeSet<String>> {
        self.state
            .read()
            .await
            .connections
            .get(&id)
            .map(|connection| connection.symbols.clone())
    }

    /// 연결의 활성 플래그.
    pub async fn is_alive(&self, id: ConnectionId) -> Option<bool> {
        self.state
            .read()
            .await
            .connections
            .get(&id)
            .map(Connection::is_alive)
    }

    /// 연결/구독 통계.
    pub async fn stats(&self) -> RegistryStats {
        let state = self.state.read().await;
        let mut symbols: Vec<SymbolStats> = state
            .index
            .iter()
            .map(|(symbol, members)| SymbolStats {
                symbol: symbol.clone(),
                subscribers: members.len(),
            })
            .collect();
        symbols.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        RegistryStats {
            connections: state.connections.len(),
            symbols,
        }
    }

    /// 연결별 심볼 집합과 역인덱스가 정확히 일치하는지 검사합니다.
    pub async fn is_consistent(&self) -> bool {
        let state = self.state.read().await;

        let forward = state.connections.iter().all(|(id, connection)| {
            connection
                .symbols
                .iter()
                .all(|symbol| state.index.contains(symbol, id))
        });
        let reverse = state.index.iter().all(|(symbol, members)| {
            !members.is_empty()
                && members.iter().all(|id| {
                    state
                        .connections
                        .get(id)
                        .is_some_and(|connection| connection.symbols.contains(symbol))
                })
        });

        forward && reverse
    }
}

#[async_trait]
impl TickBroadcaster for ConnectionRegistry {
    async fn broadcast(&self, symbol: &str, tick: &TickData) -> BroadcastReport {
        self.broadcast_tick(symbol, tick).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    fn sample_tick(price: f64) -> TickData {
        TickData {
            price,
            change: 0.0,
            change_percent: 0.0,
            volume: 0,
            timestamp: Utc::now(),
            open: Some(price),
            high: Some(price),
            low: Some(price),
        }
    }

    fn drain_texts(rx: &mut mpsc::Receiver<Outbound>) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let Outbound::Text(text) = frame {
                out.push(serde_json::from_str(&text).unwrap());
            }
        }
        out
    }

    #[tokio::test]
    async fn test_admit_and_remove() {
        let registry = ConnectionRegistry::default();
        let (handle, _rx) = ConnectionHandle::channel(8);
        let closing = handle.closing_token();

        let id = registry.admit(handle).await;
        assert_eq!(registry.connection_count().await, 1);
        assert_eq!(registry.is_alive(id).await, Some(true));

        registry.subscribe(id, "aapl").await.unwrap();
        registry.subscribe(id, "MSFT").await.unwrap();
        assert!(!closing.is_cancelled());

        let removed = registry.remove(id).await.unwrap();
        assert_eq!(removed.len(), 2);
        assert!(registry.active_symbols().await.is_empty());
        assert!(closing.is_cancelled());

        // 두 번째 제거는 무시
        assert!(registry.remove(id).await.is_none());
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_subscribe_normalizes_and_is_idempotent() {
        let registry = ConnectionRegistry::default();
        let (handle, _rx) = ConnectionHandle::channel(8);
        let id = registry.admit(handle).await;

        let first = registry.subscribe(id, "  tsla ").await.unwrap();
        assert_eq!(first.symbol.as_str(), "TSLA");
        assert!(first.changed);

        let second = registry.subscribe(id, "TSLA").await.unwrap();
        assert!(!second.changed);

        assert_eq!(registry.subscriber_count("TSLA").await, 1);
        assert_eq!(registry.subscriptions_of(id).await.unwrap().len(), 1);
        assert!(registry.is_consistent().await);
    }

    #[tokio::test]
    async fn test_subscription_limit() {
        let registry = ConnectionRegistry::default();
        let (handle, _rx) = ConnectionHandle::channel(8);
        let id = registry.admit(handle).await;

        for i in 0..50 {
            registry.subscribe(id, &format!("S{}", i)).await.unwrap();
        }

        let err = registry.subscribe(id, "S50").await.unwrap_err();
        assert_eq!(err, SubscriptionError::LimitExceeded { max: 50 });
        assert_eq!(registry.subscriptions_of(id).await.unwrap().len(), 50);

        // 이미 구독 중인 심볼은 한도와 무관하게 성공
        assert!(!registry.subscribe(id, "S0").await.unwrap().changed);
        assert!(registry.is_consistent().await);
    }

    #[tokio::test]
    async fn test_limit_error_carries_code() {
        let registry = ConnectionRegistry::new(RegistryLimits {
            max_subscriptions: 1,
            ..RegistryLimits::default()
        });
        let (handle, mut rx) = ConnectionHandle::channel(8);
        let id = registry.admit(handle).await;

        registry.subscribe(id, "AAPL").await.unwrap();
        let outcome = registry
            .handle_inbound(id, r#"{"type":"subscribe","symbol":"msft"}"#)
            .await;
        assert!(matches!(outcome, InboundOutcome::Rejected(_)));

        let replies = drain_texts(&mut rx);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["code"], "subscription-limit-exceeded");
        assert_eq!(replies[0]["symbol"], "MSFT");
    }

    #[tokio::test]
    async fn test_invalid_symbol_error_goes_to_sender_only() {
        let registry = ConnectionRegistry::default();
        let (handle_a, mut rx_a) = ConnectionHandle::channel(8);
        let (handle_b, mut rx_b) = ConnectionHandle::channel(8);
        let a = registry.admit(handle_a).await;
        let _b = registry.admit(handle_b).await;

        let outcome = registry
            .handle_inbound(a, r#"{"type":"subscribe","symbol":"ABCDEFGHIJKL"}"#)
            .await;
        assert!(matches!(outcome, InboundOutcome::Rejected(_)));

        let replies = drain_texts(&mut rx_a);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["type"], "error");
        assert_eq!(replies[0]["code"], "invalid-symbol");
        assert_eq!(replies[0]["symbol"], "ABCDEFGHIJKL");

        assert!(drain_texts(&mut rx_b).is_empty());
        assert!(registry.active_symbols().await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_messages() {
        let registry = ConnectionRegistry::default();
        let (handle, mut rx) = ConnectionHandle::channel(8);
        let id = registry.admit(handle).await;

        registry.handle_inbound(id, "{not json").await;
        registry.handle_inbound(id, r#"{"type":"auth"}"#).await;

        let replies = drain_texts(&mut rx);
        assert_eq!(replies.len(), 2);
        assert!(replies[0]["message"]
            .as_str()
            .unwrap()
            .starts_with("malformed message"));
        assert!(replies[1]["message"]
            .as_str()
            .unwrap()
            .starts_with("unknown message type"));
        assert_eq!(replies[0]["code"], "malformed-message");
        assert_eq!(replies[1]["code"], "unknown-message-type");

        // 연결은 유지
        assert_eq!(registry.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_heartbeat_replies_pong_and_marks_alive() {
        let registry = ConnectionRegistry::default();
        let (handle, mut rx) = ConnectionHandle::channel(8);
        let id = registry.admit(handle).await;

        registry
            .retain_with(|_, connection| {
                connection.alive = false;
                true
            })
            .await;
        assert_eq!(registry.is_alive(id).await, Some(false));

        let outcome = registry.handle_inbound(id, r#"{"type":"heartbeat"}"#).await;
        assert_eq!(outcome, InboundOutcome::Heartbeat);
        assert_eq!(registry.is_alive(id).await, Some(true));

        let replies = drain_texts(&mut rx);
        assert_eq!(replies, vec![serde_json::json!({"type": "pong"})]);

        registry
            .retain_with(|_, connection| {
                connection.alive = false;
                true
            })
            .await;
        let outcome = registry.handle_inbound(id, r#"{"type":"pong"}"#).await;
        assert_eq!(outcome, InboundOutcome::Pong);
        assert_eq!(registry.is_alive(id).await, Some(true));
    }

    #[tokio::test]
    async fn test_unsubscribe_last_member_clears_symbol() {
        let registry = ConnectionRegistry::default();
        let (handle, _rx) = ConnectionHandle::channel(8);
        let id = registry.admit(handle).await;

        registry.subscribe(id, "NVDA").await.unwrap();
        assert!(registry.active_symbols().await.contains("NVDA"));

        let outcome = registry
            .handle_inbound(id, r#"{"type":"unsubscribe","symbol":"nvda"}"#)
            .await;
        assert!(matches!(outcome, InboundOutcome::Unsubscribed(ref c) if c.changed));
        assert!(registry.active_symbols().await.is_empty());

        // 구독하지 않은 심볼 해제도 성공
        assert!(!registry.unsubscribe(id, "NVDA").await.unwrap().changed);
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_noop() {
        let registry = ConnectionRegistry::default();
        let (handle, mut rx) = ConnectionHandle::channel(8);
        let _id = registry.admit(handle).await;

        let report = registry.broadcast_tick("AAPL", &sample_tick(100.0)).await;
        assert_eq!(report, BroadcastReport::default());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_shares_payload_and_counts_failures() {
        let registry = ConnectionRegistry::default();
        let (fast, mut fast_rx) = ConnectionHandle::channel(8);
        let (slow, mut slow_rx) = ConnectionHandle::channel(1);
        let (gone, gone_rx) = ConnectionHandle::channel(8);

        let fast_id = registry.admit(fast).await;
        let slow_id = registry.admit(slow.clone()).await;
        let gone_id = registry.admit(gone).await;
        for id in [fast_id, slow_id, gone_id] {
            registry.subscribe(id, "MSFT").await.unwrap();
        }

        slow.try_send(Outbound::Ping).unwrap();
        drop(gone_rx);

        let report = registry.broadcast_tick("MSFT", &sample_tick(410.0)).await;
        assert_eq!(
            report,
            BroadcastReport {
                delivered: 1,
                dropped: 1,
                failed: 1
            }
        );
        assert_eq!(report.recipients(), 3);

        // 브로드캐스트는 연결을 제거하지 않음
        assert_eq!(registry.connection_count().await, 3);

        let Ok(Outbound::Text(text)) = fast_rx.try_recv() else {
            panic!("expected price update");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "price_update");
        assert_eq!(value["symbol"], "MSFT");
        assert_eq!(value["data"]["price"], 410.0);

        assert_eq!(slow_rx.try_recv().unwrap(), Outbound::Ping);
        assert!(slow_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stats() {
        let registry = ConnectionRegistry::default();
        let (a, _ra) = ConnectionHandle::channel(8);
        let (b, _rb) = ConnectionHandle::channel(8);
        let a = registry.admit(a).await;
        let b = registry.admit(b).await;

        registry.subscribe(a, "TSLA").await.unwrap();
        registry.subscribe(b, "TSLA").await.unwrap();
        registry.subscribe(b, "AAPL").await.unwrap();

        let stats = registry.stats().await;
        assert_eq!(stats.connections, 2);
        assert_eq!(
            stats.symbols,
            vec![
                SymbolStats {
                    symbol: "AAPL".to_string(),
                    subscribers: 1
                },
                SymbolStats {
                    symbol: "TSLA".to_string(),
                    subscribers: 2
                },
            ]
        );
    }

    #[derive(Debug, Clone)]
    enum Op {
        Subscribe(usize, usize),
        Unsubscribe(usize, usize),
        Remove(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..4usize, 0..6usize).prop_map(|(c, s)| Op::Subscribe(c, s)),
            (0..4usize, 0..6usize).prop_map(|(c, s)| Op::Unsubscribe(c, s)),
            (0..4usize).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn prop_index_matches_connection_sets(ops in prop::collection::vec(op_strategy(), 1..60)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();

            runtime.block_on(async {
                const SYMBOLS: [&str; 6] = ["AAPL", "MSFT", "TSLA", "NVDA", "AMZN", "META"];
                let registry = ConnectionRegistry::new(RegistryLimits {
                    max_subscriptions: 3,
                    max_symbol_len: MAX_SYMBOL_LEN,
                });

                let mut ids = Vec::new();
                let mut receivers = Vec::new();
                for _ in 0..4 {
                    let (handle, rx) = ConnectionHandle::channel(4);
                    ids.push(registry.admit(handle).await);
                    receivers.push(rx);
                }

                for op in ops {
                    match op {
                        Op::Subscribe(c, s) => {
                            let _ = registry.subscribe(ids[c], SYMBOLS[s]).await;
                        }
                        Op::Unsubscribe(c, s) => {
                            let _ = registry.unsubscribe(ids[c], SYMBOLS[s]).await;
                        }
                        Op::Remove(c) => {
                            registry.remove(ids[c]).await;
                        }
                    }
                    assert!(registry.is_consistent().await);
                }

                for id in &ids {
                    if let Some(symbols) = registry.subscriptions_of(*id).await {
                        assert!(symbols.len() <= 3);
                    }
                }
            });
        }
    }
}
