//! 시드 시계열 제공자.
//!
//! 시뮬레이션 엔진은 심볼을 처음 구동할 때 최근 일봉 시계열을 가져와
//! 기준 가격과 변동성을 계산합니다. 이 모듈은 그 조회를 추상화합니다.

mod alpha_vantage;

pub use alpha_vantage::AlphaVantageProvider;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use ticker_core::Candle;

use crate::error::{DataError, Result};

/// 시드 시계열 제공자.
///
/// 반환되는 시계열은 최신 캔들이 먼저 오도록 정렬되어 있어야 합니다.
#[async_trait]
pub trait SeedSeriesProvider: Send + Sync {
    /// 심볼의 최근 일봉 시계열을 가져옵니다.
    ///
    /// # Errors
    ///
    /// - [`DataError::DataUnavailable`]: 심볼 데이터 없음
    /// - [`DataError::RateLimited`]: 호출 한도 초과
    /// - [`DataError::Network`]: 전송 실패
    async fn fetch_seed_series(&self, symbol: &str) -> Result<Vec<Candle>>;

    /// 로그용 제공자 이름.
    fn name(&self) -> &'static str;
}

/// 메모리에 고정된 시계열을 돌려주는 제공자.
///
/// 오프라인 실행과 테스트에서 사용합니다. 등록되지 않은 심볼은
/// [`DataError::DataUnavailable`]을 반환합니다.
#[derive(Debug, Default)]
pub struct StaticSeedProvider {
    series: HashMap<String, Vec<Candle>>,
    fetches: AtomicUsize,
}

impl StaticSeedProvider {
    /// 빈 제공자 생성.
    pub fn new() -> Self {
        Self::default()
    }

    /// 심볼별 고정 가격으로 생성합니다 (가격당 캔들 1개).
    pub fn from_prices(prices: &HashMap<String, f64>) -> Self {
        prices
            .iter()
            .fold(Self::new(), |provider, (symbol, price)| {
                provider.with_price(symbol, *price)
            })
    }

    /// 캔들 1개짜리 시계열을 등록합니다.
    pub fn with_price(self, symbol: &str, price: f64) -> Self {
        let price = Decimal::from_f64(price).unwrap_or(Decimal::ONE);
        let candle = Candle::new(Utc::now(), price, price, price, price, 0);
        self.with_series(symbol, vec![candle])
    }

    /// 종가 목록(최신 순)으로 일봉 시계열을 등록합니다.
    pub fn with_closes(self, symbol: &str, closes: &[f64]) -> Self {
        let today = Utc::now();
        let candles = closes
            .iter()
            .enumerate()
            .filter_map(|(days_ago, close)| {
                let close = Decimal::from_f64(*close)?;
                let ts = today - Duration::days(days_ago as i64);
                Some(Candle::new(ts, close, close, close, close, 0))
            })
            .collect();
        self.with_series(symbol, candles)
    }

    /// 시계열을 그대로 등록합니다.
    pub fn with_series(mut self, symbol: &str, candles: Vec<Candle>) -> Self {
        self.series.insert(symbol.trim().to_uppercase(), candles);
        self
    }

    /// 지금까지의 조회 횟수.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SeedSeriesProvider for StaticSeedProvider {
    async fn fetch_seed_series(&self, symbol: &str) -> Result<Vec<Candle>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);

        match self.series.get(&symbol.to_uppercase()) {
            Some(candles) if !candles.is_empty() => Ok(candles.clone()),
            _ => Err(DataError::DataUnavailable(symbol.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_static_provider_lookup() {
        let provider = StaticSeedProvider::new().with_price("aapl", 190.25);

        let series = provider.fetch_seed_series("AAPL").await.unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].close, dec!(190.25));
        assert_eq!(provider.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_static_provider_unknown_symbol() {
        let provider = StaticSeedProvider::new();

        let err = provider.fetch_seed_series("NOPE").await.unwrap_err();
        assert!(matches!(err, DataError::DataUnavailable(_)));
        assert_eq!(provider.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_static_provider_closes_most_recent_first() {
        let provider = StaticSeedProvider::new().with_closes("MSFT", &[101.0, 100.0, 99.0]);

        let series = provider.fetch_seed_series("MSFT").await.unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series[0].close, dec!(101));
        assert!(series[0].timestamp > series[2].timestamp);
    }

    #[test]
    fn test_from_prices() {
        let mut prices = HashMap::new();
        prices.insert("TSLA".to_string(), 250.0);
        prices.insert("NVDA".to_string(), 480.5);

        let provider = StaticSeedProvider::from_prices(&prices);
        assert_eq!(provider.series.len(), 2);
    }
}
