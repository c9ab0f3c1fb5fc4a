//! 실시간 시세 배포를 위한 WebSocket 서버.
//!
//! 클라이언트는 심볼 단위로 구독하고, 구독자가 있는 심볼마다
//! 시뮬레이션 엔진이 주기적으로 틱을 생성해 구독자에게 배포합니다.
//!
//! # 구성 요소
//!
//! - [`messages`]: 와이어 메시지 코덱
//! - [`connection`]: 연결 레지스트리 (연결 맵 + 구독 인덱스, 단일 락)
//! - [`subscriptions`]: 심볼 → 연결 역인덱스
//! - [`heartbeat`]: 무응답 연결 퇴출
//! - [`simulator`]: 심볼별 가격 시뮬레이션 엔진
//! - [`lifecycle`]: 수요 기반 엔진 시작/정지
//! - [`handler`]: `/ws` 엔드포인트
//!
//! # 메시지 형식
//!
//! 모든 메시지는 JSON 형식으로 교환됩니다.
//!
//! ## 클라이언트 → 서버
//!
//! ```json
//! {"type": "subscribe", "symbol": "AAPL"}
//! {"type": "unsubscribe", "symbol": "AAPL"}
//! {"type": "heartbeat"}
//! {"type": "pong"}
//! ```
//!
//! ## 서버 → 클라이언트
//!
//! ```json
//! {"type": "price_update", "symbol": "AAPL", "data": {...}}
//! {"type": "error", "code": "invalid-symbol", "message": "...", "symbol": "..."}
//! {"type": "pong"}
//! ```

pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod lifecycle;
pub mod messages;
pub mod simulator;
pub mod subscriptions;

pub use connection::{
    create_registry, BroadcastReport, ConnectionHandle, ConnectionId, ConnectionRegistry,
    InboundOutcome, Outbound, RegistryLimits, RegistryStats, SharedRegistry, SubscriptionChange,
    SubscriptionError, SymbolStats, TickBroadcaster,
};
pub use handler::{websocket_handler, websocket_router, WsState};
pub use heartbeat::{start_heartbeat, HeartbeatMonitor, SweepReport};
pub use lifecycle::{
    start_lifecycle, LifecycleController, LifecycleError, LifecycleHandle, LifecycleSettings,
    ReconcileReport,
};
pub use messages::{ClientMessage, ErrorCode, MessageType, ServerMessage, WsError};
pub use simulator::{EngineCommand, EngineHandle, SimulationState};
pub use subscriptions::SubscriptionIndex;
