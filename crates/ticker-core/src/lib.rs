//! # Ticker Core
//!
//! 실시간 시세 스트리밍 서비스의 핵심 타입을 제공합니다.
//!
//! 이 크레이트는 워크스페이스 전반에서 사용되는 기본 타입을 제공합니다:
//! - 심볼 정규화 및 검증
//! - 시장 데이터 구조체 (일봉 캔들, 틱)
//! - 설정 관리
//! - 로깅 인프라

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod types;

pub use config::*;
pub use domain::*;
pub use error::*;
pub use logging::*;
pub use types::*;
