//! WebSocket 메시지 타입.
//!
//! 클라이언트-서버 간 교환되는 메시지 정의.
//!
//! 모든 메시지는 `type` 필드를 태그로 갖는 JSON 객체입니다.
//! 디코딩은 먼저 [`serde_json::Value`]로 읽어 `type`을 확인한 뒤 본문을 해석하므로
//! "형식 오류"와 "알 수 없는 타입"을 구분할 수 있습니다.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ticker_core::TickData;

/// WebSocket 에러.
///
/// 표시 문자열은 그대로 클라이언트의 `error` 메시지로 전달됩니다.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("malformed message: {0}")]
    InvalidMessage(String),
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),
    #[error("serialization failed: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl WsError {
    /// 클라이언트에 전달되는 에러 코드.
    pub fn code(&self) -> ErrorCode {
        match self {
            WsError::UnknownMessageType(_) => ErrorCode::UnknownMessageType,
            WsError::InvalidMessage(_) | WsError::SerializationError(_) => {
                ErrorCode::MalformedMessage
            }
        }
    }
}

/// `error` 메시지의 `code` 필드.
///
/// 메시지 문구와 달리 값이 고정되어 있어 클라이언트가 분기에 사용할 수 있습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    /// JSON 객체가 아니거나 필수 필드 누락
    MalformedMessage,
    /// 알 수 없는 `type`
    UnknownMessageType,
    /// 심볼 형식 오류
    InvalidSymbol,
    /// 연결당 구독 한도 초과
    SubscriptionLimitExceeded,
}

/// 메시지 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Subscribe,
    Unsubscribe,
    PriceUpdate,
    Error,
    Heartbeat,
    Pong,
}

impl MessageType {
    /// 와이어 태그 문자열.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Subscribe => "subscribe",
            MessageType::Unsubscribe => "unsubscribe",
            MessageType::PriceUpdate => "price_update",
            MessageType::Error => "error",
            MessageType::Heartbeat => "heartbeat",
            MessageType::Pong => "pong",
        }
    }

    /// 태그 문자열에서 파싱.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "subscribe" => Some(MessageType::Subscribe),
            "unsubscribe" => Some(MessageType::Unsubscribe),
            "price_update" => Some(MessageType::PriceUpdate),
            "error" => Some(MessageType::Error),
            "heartbeat" => Some(MessageType::Heartbeat),
            "pong" => Some(MessageType::Pong),
            _ => None,
        }
    }

    /// 클라이언트가 보낼 수 있는 종류인지 여부.
    pub fn is_client_kind(&self) -> bool {
        matches!(
            self,
            MessageType::Subscribe
                | MessageType::Unsubscribe
                | MessageType::Heartbeat
                | MessageType::Pong
        )
    }
}

// ==================== 클라이언트 → 서버 메시지 ====================

/// 클라이언트에서 서버로 보내는 메시지.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// 심볼 구독
    Subscribe {
        /// 구독할 심볼 (정규화 전)
        symbol: String,
    },
    /// 심볼 구독 해제
    Unsubscribe {
        /// 구독 해제할 심볼 (정규화 전)
        symbol: String,
    },
    /// 애플리케이션 레벨 하트비트 (pong으로 응답)
    Heartbeat,
    /// 서버 프로브에 대한 응답
    Pong,
}

impl ClientMessage {
    /// JSON 문자열에서 파싱.
    ///
    /// # Errors
    ///
    /// - [`WsError::InvalidMessage`]: JSON 객체가 아니거나, 문자열 `type`이 없거나,
    ///   필수 필드가 빠진 경우
    /// - [`WsError::UnknownMessageType`]: 클라이언트 메시지 종류가 아닌 `type`
    pub fn from_json(json: &str) -> Result<Self, WsError> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| WsError::InvalidMessage(e.to_string()))?;

        let tag = value
            .as_object()
            .ok_or_else(|| WsError::InvalidMessage("expected a JSON object".to_string()))?
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| WsError::InvalidMessage("missing string field 'type'".to_string()))?;

        match MessageType::from_tag(tag) {
            Some(kind) if kind.is_client_kind() => {}
            _ => return Err(WsError::UnknownMessageType(tag.to_string())),
        }

        serde_json::from_value(value).map_err(|e| WsError::InvalidMessage(e.to_string()))
    }

    /// 메시지 종류.
    pub fn kind(&self) -> MessageType {
        match self {
            ClientMessage::Subscribe { .. } => MessageType::Subscribe,
            ClientMessage::Unsubscribe { .. } => MessageType::Unsubscribe,
            ClientMessage::Heartbeat => MessageType::Heartbeat,
            ClientMessage::Pong => MessageType::Pong,
        }
    }
}

// ==================== 서버 → 클라이언트 메시지 ====================

/// 서버에서 클라이언트로 보내는 메시지.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// 가격 틱
    PriceUpdate {
        /// 심볼
        symbol: String,
        /// 틱 데이터
        data: TickData,
    },
    /// 에러
    Error {
        /// 고정 에러 코드
        code: ErrorCode,
        /// 에러 메시지
        message: String,
        /// 관련 심볼
        #[serde(default, skip_serializing_if = "Option::is_none")]
        symbol: Option<String>,
    },
    /// 클라이언트 하트비트 응답
    Pong,
}

impl ServerMessage {
    /// JSON 문자열로 직렬화.
    pub fn to_json(&self) -> Result<String, WsError> {
        serde_json::to_string(self).map_err(WsError::from)
    }

    /// 에러 메시지 생성 헬퍼.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code,
            message: message.into(),
            symbol: None,
        }
    }

    /// 심볼이 지정된 에러 메시지 생성 헬퍼.
    pub fn symbol_error(
        code: ErrorCode,
        symbol: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ServerMessage::Error {
            code,
            message: message.into(),
            symbol: Some(symbol.into()),
        }
    }

    /// 메시지 종류.
    pub fn kind(&self) -> MessageType {
        match self {
            ServerMessage::PriceUpdate { .. } => MessageType::PriceUpdate,
            ServerMessage::Error { .. } => MessageType::Error,
            ServerMessage::Pong => MessageType::Pong,
        }
    }
}
