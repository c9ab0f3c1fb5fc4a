//! Alpha Vantage 일봉 제공자.
//!
//! `TIME_SERIES_DAILY` 엔드포인트에서 최근 100 거래일(compact)을 가져옵니다.
//!
//! Alpha Vantage는 한도 초과나 잘못된 심볼에도 HTTP 200을 돌려주므로
//! 본문의 `Note` / `Information` / `Error Message` 필드로 오류를 구분합니다.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use ticker_core::{Candle, DataConfig};
use tracing::{debug, instrument, warn};

use super::SeedSeriesProvider;
use crate::error::{DataError, Result};
use crate::rate_limit::{Acquire, FixedWindowLimiter};

/// Alpha Vantage 일봉 응답.
#[derive(Debug, Deserialize)]
struct DailySeriesResponse {
    #[serde(rename = "Time Series (Daily)")]
    series: Option<BTreeMap<String, DailyBar>>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DailyBar {
    #[serde(rename = "1. open")]
    open: Decimal,
    #[serde(rename = "2. high")]
    high: Decimal,
    #[serde(rename = "3. low")]
    low: Decimal,
    #[serde(rename = "4. close")]
    close: Decimal,
    #[serde(rename = "5. volume")]
    volume: String,
}

/// Alpha Vantage 기반 시드 제공자.
pub struct AlphaVantageProvider {
    client: Client,
    base_url: String,
    api_key: String,
    limiter: FixedWindowLimiter,
}

impl AlphaVantageProvider {
    /// 새 제공자 생성.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        requests_per_minute: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DataError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            limiter: FixedWindowLimiter::per_minute(requests_per_minute),
        })
    }

    /// 데이터 설정에서 생성.
    pub fn from_config(config: &DataConfig) -> Result<Self> {
        Self::new(
            config.alpha_vantage_base_url.clone(),
            config.alpha_vantage_api_key.clone(),
            config.requests_per_minute,
            config.request_timeout(),
        )
    }

    /// 응답 본문을 최신 순 캔들로 변환합니다.
    fn parse_daily_series(symbol: &str, body: DailySeriesResponse) -> Result<Vec<Candle>> {
        if let Some(message) = body.error_message {
            return Err(DataError::DataUnavailable(format!("{}: {}", symbol, message)));
        }
        if let Some(message) = body.note.or(body.information) {
            return Err(DataError::RateLimited(message));
        }

        let series = body
            .series
            .ok_or_else(|| DataError::DataUnavailable(symbol.to_string()))?;

        // BTreeMap은 날짜 오름차순이므로 뒤집어서 최신 순으로
        let mut candles = Vec::with_capacity(series.len());
        for (date, bar) in series.into_iter().rev() {
            let day = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .map_err(|e| DataError::Parse(format!("date '{}': {}", date, e)))?;
            let timestamp = day
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| DataError::Parse(format!("date '{}'", date)))?
                .and_utc();
            let volume = bar
                .volume
                .parse::<u64>()
                .map_err(|e| DataError::Parse(format!("volume '{}': {}", bar.volume, e)))?;

            candles.push(Candle::new(
                timestamp, bar.open, bar.high, bar.low, bar.close, volume,
            ));
        }

        if candles.is_empty() {
            return Err(DataError::DataUnavailable(symbol.to_string()));
        }

        Ok(candles)
    }
}

#[async_trait]
impl SeedSeriesProvider for AlphaVantageProvider {
    #[instrument(skip(self), fields(provider = "alpha_vantage"))]
    async fn fetch_seed_series(&self, symbol: &str) -> Result<Vec<Candle>> {
        if let Acquire::Limited { retry_after } = self.limiter.try_acquire().await {
            warn!(retry_after_secs = retry_after.as_secs(), "Local rate limit reached");
            return Err(DataError::RateLimited(format!(
                "retry after {}s",
                retry_after.as_secs()
            )));
        }

        let url = format!("{}/query", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("function", "TIME_SERIES_DAILY"),
                ("symbol", symbol),
                ("outputsize", "compact"),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(DataError::RateLimited("HTTP 429".to_string()));
            }
            status if !status.is_success() => {
                return Err(DataError::Network(format!("HTTP {}", status)));
            }
            _ => {}
        }

        let body: DailySeriesResponse = response.json().await?;
        let candles = Self::parse_daily_series(symbol, body)?;

        debug!(count = candles.len(), "Fetched daily series");
        Ok(candles)
    }

    fn name(&self) -> &'static str {
        "alpha_vantage"
    }
}
