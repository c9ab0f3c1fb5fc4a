//! 심볼 정의 및 정규화.
//!
//! 클라이언트가 보낸 티커 문자열을 정규화(공백 제거, 대문자 변환)하고
//! 길이와 문자 구성을 검증합니다.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 심볼 최대 길이 기본값.
pub const MAX_SYMBOL_LEN: usize = 10;

/// 심볼 검증 에러.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolError {
    /// 공백만 있거나 빈 문자열
    #[error("symbol must not be empty")]
    Empty,
    /// 최대 길이 초과
    #[error("symbol '{symbol}' exceeds {max} characters")]
    TooLong {
        /// 정규화된 심볼
        symbol: String,
        /// 허용 최대 길이
        max: usize,
    },
    /// 허용되지 않는 문자 포함
    #[error("symbol '{0}' contains unsupported characters")]
    InvalidCharacters(String),
}

/// 정규화된 티커 심볼.
///
/// 항상 대문자이며 앞뒤 공백이 없고, 길이는 생성 시 지정한 최대값 이하입니다.
/// 영숫자와 `.`, `-`만 허용합니다 (예: `AAPL`, `BRK.B`, `BTC-USD`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// 기본 최대 길이로 심볼을 파싱합니다.
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        Self::parse_with_limit(raw, MAX_SYMBOL_LEN)
    }

    /// 지정한 최대 길이로 심볼을 파싱합니다.
    pub fn parse_with_limit(raw: &str, max_len: usize) -> Result<Self, SymbolError> {
        let normalized = raw.trim().to_uppercase();

        if normalized.is_empty() {
            return Err(SymbolError::Empty);
        }
        if normalized.chars().count() > max_len {
            return Err(SymbolError::TooLong {
                symbol: normalized,
                max: max_len,
            });
        }
        if !normalized
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        {
            return Err(SymbolError::InvalidCharacters(normalized));
        }

        Ok(Self(normalized))
    }

    /// 문자열 슬라이스로 반환합니다.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}
