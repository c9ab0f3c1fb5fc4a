//! # Ticker API
//!
//! 실시간 시세 스트리밍 서버.
//!
//! # 구성
//!
//! - [`websocket`]: `/ws` 엔드포인트, 연결 레지스트리, 하트비트, 시뮬레이션 엔진, 수명주기 컨트롤러
//! - [`routes`]: 헬스 체크, 스트리밍 현황, 세션 초기화
//! - [`service`]: 백그라운드 태스크 조립
//! - [`metrics`]: Prometheus 메트릭

pub mod error;
pub mod metrics;
pub mod routes;
pub mod service;
pub mod state;
pub mod websocket;

pub use error::{ApiErrorResponse, ApiResult};
pub use routes::{build_router, create_api_router};
pub use service::StreamService;
pub use state::AppState;
