//! 시세 스트리밍 서비스의 에러 타입.
//!
//! 이 모듈은 서비스 전반에서 사용되는 공통 에러 타입을 정의합니다.

use thiserror::Error;

/// 핵심 서비스 에러.
#[derive(Debug, Error)]
pub enum TickerError {
    /// 설정 로드 에러
    #[error("설정 에러: {0}")]
    Config(String),

    /// 잘못된 입력 (설정 값 검증 실패 포함)
    #[error("잘못된 입력: {0}")]
    InvalidInput(String),
}

/// 서비스 작업을 위한 Result 타입.
pub type TickerResult<T> = Result<T, TickerError>;

impl From<config::ConfigError> for TickerError {
    fn from(err: config::ConfigError) -> Self {
        TickerError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TickerError::Config("missing api key".to_string());
        assert_eq!(err.to_string(), "설정 에러: missing api key");

        let err = TickerError::InvalidInput("stream.tick_interval_ms must be > 0".to_string());
        assert_eq!(
            err.to_string(),
            "잘못된 입력: stream.tick_interval_ms must be > 0"
        );
    }

    #[test]
    fn test_from_config_error() {
        let err: TickerError = config::ConfigError::Message("bad toml".to_string()).into();
        assert!(matches!(err, TickerError::Config(msg) if msg.contains("bad toml")));
    }
}
