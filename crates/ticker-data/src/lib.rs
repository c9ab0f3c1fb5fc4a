//! 시뮬레이션 시드 데이터 관리.
//!
//! 이 crate는 다음을 제공합니다:
//! - 시드 시계열 제공자 trait 및 구현 (Alpha Vantage, 고정 가격)
//! - Redis cache-aside 래퍼
//! - 외부 API 호출을 위한 고정 윈도우 rate limiter

pub mod cache;
pub mod error;
pub mod provider;
pub mod rate_limit;
pub mod storage;

pub use error::{DataError, Result};

pub use cache::{CachedSeedProvider, SeriesCache};
pub use provider::{AlphaVantageProvider, SeedSeriesProvider, StaticSeedProvider};
pub use rate_limit::{Acquire, FixedWindowLimiter};
pub use storage::redis::{RedisCache, RedisConfig};
