//! 설정 관리.
//!
//! 설정은 다음 순서로 병합됩니다 (뒤쪽이 우선):
//! 1. 각 필드의 기본값
//! 2. TOML 설정 파일 (선택, 기본 경로 `config/default.toml`)
//! 3. `TICKER__{SECTION}__{KEY}` 환경 변수 (예: `TICKER__STREAM__TICK_INTERVAL_MS=1000`)

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{TickerError, TickerResult};
use crate::types::MAX_SYMBOL_LEN;

/// 설정 파일 경로를 지정하는 환경 변수.
pub const CONFIG_PATH_ENV: &str = "TICKER_CONFIG";

/// 기본 설정 파일 경로.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// 애플리케이션 설정.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// 서버 설정
    pub server: ServerConfig,
    /// 스트리밍 엔진 설정
    pub stream: StreamConfig,
    /// 시드 데이터 설정
    pub data: DataConfig,
    /// 로깅 설정
    pub logging: LoggingConfig,
}

/// 서버 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 바인딩할 호스트
    pub host: String,
    /// 리스닝할 포트
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl ServerConfig {
    /// `host:port` 형식의 바인딩 주소.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 스트리밍 엔진 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamConfig {
    /// 하트비트 프로브 주기 (초)
    pub heartbeat_interval_secs: u64,
    /// 심볼별 시뮬레이션 틱 주기 (밀리초)
    pub tick_interval_ms: u64,
    /// 수요 조정(reconcile) 폴링 주기 (밀리초)
    pub reconcile_interval_ms: u64,
    /// 수요가 사라진 시뮬레이션 상태의 보존 기간 (초)
    pub grace_period_secs: u64,
    /// 연결당 최대 구독 수
    pub max_subscriptions: usize,
    /// 심볼 최대 길이
    pub max_symbol_len: usize,
    /// 연결별 송신 큐 크기
    pub outbound_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            tick_interval_ms: 4_000,
            reconcile_interval_ms: 5_000,
            grace_period_secs: 300,
            max_subscriptions: 50,
            max_symbol_len: MAX_SYMBOL_LEN,
            outbound_buffer: 256,
        }
    }
}

impl StreamConfig {
    /// 하트비트 주기.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// 틱 주기.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// 수요 조정 주기.
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    /// 상태 보존 기간.
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

/// 시드 데이터 제공자 종류.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedProviderKind {
    /// Alpha Vantage 일봉 API
    #[default]
    AlphaVantage,
    /// 설정 파일의 고정 시드 가격
    Static,
}

/// 시드 데이터 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DataConfig {
    /// 사용할 제공자
    pub provider: SeedProviderKind,
    /// Alpha Vantage API 키
    pub alpha_vantage_api_key: String,
    /// Alpha Vantage 베이스 URL
    pub alpha_vantage_base_url: String,
    /// 분당 최대 API 호출 수
    pub requests_per_minute: u32,
    /// HTTP 요청 타임아웃 (초)
    pub request_timeout_secs: u64,
    /// Redis URL (설정 시 cache-aside 활성화)
    pub redis_url: Option<String>,
    /// 시드 시계열 캐시 TTL (초)
    pub cache_ttl_secs: u64,
    /// `static` 제공자에서 사용할 심볼별 시드 가격
    pub static_prices: std::collections::HashMap<String, f64>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            provider: SeedProviderKind::AlphaVantage,
            alpha_vantage_api_key: "demo".to_string(),
            alpha_vantage_base_url: "https://www.alphavantage.co".to_string(),
            requests_per_minute: 5,
            request_timeout_secs: 10,
            redis_url: None,
            cache_ttl_secs: 3_600,
            static_prices: std::collections::HashMap::new(),
        }
    }
}

impl DataConfig {
    /// HTTP 요청 타임아웃.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 로그 레벨
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    pub format: String,
    /// 파일명과 줄 번호 포함 여부
    pub with_file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            with_file: false,
        }
    }
}

impl AppConfig {
    /// 파일과 환경 변수에서 설정을 로드합니다.
    ///
    /// 파일이 없으면 기본값과 환경 변수만 사용합니다.
    ///
    /// # Errors
    ///
    /// 파싱에 실패하면 [`TickerError::Config`], 값이 범위를 벗어나면 [`TickerError::InvalidInput`]
    pub fn load<P: AsRef<Path>>(path: P) -> TickerResult<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("TICKER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// `TICKER_CONFIG` 또는 기본 경로에서 설정을 로드합니다.
    pub fn load_default() -> TickerResult<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(path)
    }

    /// 엔진이 동작할 수 없는 값을 거부합니다.
    pub fn validate(&self) -> TickerResult<()> {
        let stream = &self.stream;
        let non_zero = [
            ("stream.heartbeat_interval_secs", stream.heartbeat_interval_secs),
            ("stream.tick_interval_ms", stream.tick_interval_ms),
            ("stream.reconcile_interval_ms", stream.reconcile_interval_ms),
            ("stream.max_subscriptions", stream.max_subscriptions as u64),
            ("stream.outbound_buffer", stream.outbound_buffer as u64),
        ];
        if let Some((key, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(TickerError::InvalidInput(format!("{key} must be > 0")));
        }

        if stream.max_symbol_len == 0 || stream.max_symbol_len > MAX_SYMBOL_LEN {
            return Err(TickerError::InvalidInput(format!(
                "stream.max_symbol_len must be in 1..={MAX_SYMBOL_LEN}, got {}",
                stream.max_symbol_len
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_defaults() {
        let config = StreamConfig::default();

        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.tick_interval(), Duration::from_secs(4));
        assert_eq!(config.reconcile_interval(), Duration::from_secs(5));
        assert_eq!(config.grace_period(), Duration::from_secs(300));
        assert_eq!(config.max_subscriptions, 50);
        assert_eq!(config.max_symbol_len, 10);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = AppConfig::load("does/not/exist.toml").unwrap();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.data.provider, SeedProviderKind::AlphaVantage);
        assert_eq!(config.data.requests_per_minute, 5);
        assert!(config.data.redis_url.is_none());
        assert!(!config.logging.with_file);
    }

    #[test]
    fn test_validate_rejects_unusable_stream_values() {
        assert!(AppConfig::default().validate().is_ok());

        let mut config = AppConfig::default();
        config.stream.tick_interval_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(&err, TickerError::InvalidInput(msg) if msg.contains("tick_interval_ms")));

        let mut config = AppConfig::default();
        config.stream.outbound_buffer = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.stream.max_symbol_len = MAX_SYMBOL_LEN + 1;
        let err = config.validate().unwrap_err();
        assert!(matches!(&err, TickerError::InvalidInput(msg) if msg.contains("max_symbol_len")));
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let path = std::env::temp_dir().join(format!(
            "ticker-invalid-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[stream]\nmax_subscriptions = 0\n").unwrap();

        let result = AppConfig::load(&path);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(result, Err(TickerError::InvalidInput(_))));
    }

    #[test]
    fn test_partial_toml_section() {
        let toml = r#"
            [stream]
            tick_interval_ms = 250

            [data]
            provider = "static"

            [data.static_prices]
            AAPL = 190.5
        "#;

        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.stream.tick_interval(), Duration::from_millis(250));
        assert_eq!(config.stream.heartbeat_interval_secs, 30);
        assert_eq!(config.data.provider, SeedProviderKind::Static);
        // 키 대소문자는 config 크레이트 버전에 따라 달라질 수 있음
        assert!(config
            .data
            .static_prices
            .iter()
            .any(|(symbol, price)| symbol.eq_ignore_ascii_case("AAPL") && *price == 190.5));
        assert_eq!(config.server.bind_addr(), "127.0.0.1:3000");
    }
}
