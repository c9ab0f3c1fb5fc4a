//! API 에러 응답 타입.
//!
//! 모든 HTTP 핸들러는 [`ApiErrorResponse`]로 에러를 반환합니다.
//!
//! # 응답 형식
//!
//! ```json
//! {
//!   "code": "STREAM_UNAVAILABLE",
//!   "message": "lifecycle controller is not running",
//!   "timestamp": 1706000000
//! }
//! ```

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::websocket::LifecycleError;

/// 통합 API 에러 응답.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiErrorResponse {
    /// 에러 코드 (예: "STREAM_UNAVAILABLE")
    pub code: String,
    /// 에러 메시지
    pub message: String,
    /// 에러 발생 시각 (Unix timestamp)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl ApiErrorResponse {
    /// 타임스탬프를 포함한 에러 응답 생성.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            timestamp: Some(chrono::Utc::now().timestamp()),
        }
    }
}

impl std::fmt::Display for ApiErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiErrorResponse {}

impl From<LifecycleError> for ApiErrorResponse {
    fn from(error: LifecycleError) -> Self {
        match error {
            LifecycleError::Unavailable => Self::new("STREAM_UNAVAILABLE", error.to_string()),
        }
    }
}

/// API 핸들러 Result 타입 별칭.
pub type ApiResult<T> = Result<T, (StatusCode, Json<ApiErrorResponse>)>;

/// 수명주기 에러를 HTTP 에러로 변환.
pub fn lifecycle_error(error: LifecycleError) -> (StatusCode, Json<ApiErrorResponse>) {
    let status = match error {
        LifecycleError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(error.into()))
}
