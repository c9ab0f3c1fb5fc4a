//! 시장 데이터 타입.
//!
//! - [`Candle`]: 외부 데이터 소스에서 가져온 일봉 (시뮬레이션 시드용)
//! - [`TickData`]: 클라이언트에게 브로드캐스트되는 실시간 틱 페이로드

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};

/// 일봉 캔들.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// 캔들 기준 시각 (거래일)
    pub timestamp: DateTime<Utc>,
    /// 시가
    pub open: Decimal,
    /// 고가
    pub high: Decimal,
    /// 저가
    pub low: Decimal,
    /// 종가
    pub close: Decimal,
    /// 거래량
    pub volume: u64,
}

impl Candle {
    /// 새 캔들을 생성합니다.
    pub fn new(
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: u64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

/// 클라이언트로 전송되는 틱 데이터.
///
/// 가격 필드는 소수점 둘째 자리로 반올림된 값입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickData {
    /// 현재가
    pub price: f64,
    /// 세션 시가 대비 변화량
    pub change: f64,
    /// 세션 시가 대비 변화율 (%)
    pub change_percent: f64,
    /// 누적 세션 거래량
    pub volume: u64,
    /// 틱 생성 시각
    #[serde(serialize_with = "serialize_millis")]
    pub timestamp: DateTime<Utc>,
    /// 세션 시가
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open: Option<f64>,
    /// 세션 고가
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
    /// 세션 저가
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
}

/// `2024-01-01T15:04:05.000Z` 형식으로 직렬화.
fn serialize_millis<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// 소수점 둘째 자리로 반올림합니다.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
