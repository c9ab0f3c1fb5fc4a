//! 데이터 모듈 오류 타입.

use thiserror::Error;

/// 데이터 관련 오류.
#[derive(Debug, Error)]
pub enum DataError {
    /// 해당 심볼의 데이터가 없음
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    /// 외부 API 호출 한도 초과
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// 네트워크/HTTP 오류
    #[error("Network error: {0}")]
    Network(String),

    /// 응답 파싱 오류
    #[error("Parse error: {0}")]
    Parse(String),

    /// 캐시 오류
    #[error("Cache error: {0}")]
    Cache(String),

    /// 설정 오류
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DataError {
    /// 다음 폴링 주기에 재시도할 가치가 있는지 확인합니다.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DataError::RateLimited(_) | DataError::Network(_) | DataError::Cache(_)
        )
    }
}

impl From<reqwest::Error> for DataError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            DataError::Parse(err.to_string())
        } else {
            DataError::Network(err.to_string())
        }
    }
}

impl From<redis::RedisError> for DataError {
    fn from(err: redis::RedisError) -> Self {
        DataError::Cache(err.to_string())
    }
}

impl From<serde_json::Error> for DataError {
    fn from(err: serde_json::Error) -> Self {
        DataError::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(DataError::RateLimited("5/min".into()).is_retryable());
        assert!(DataError::Network("timeout".into()).is_retryable());
        assert!(!DataError::DataUnavailable("ZZZZ".into()).is_retryable());
    }
}
