//! 시드 시계열 cache-aside.
//!
//! ```text
//! fetch_seed_series(symbol)
//!         │
//!   ┌─────▼─────┐  hit
//!   │ cache get │──────────► 반환
//!   └─────┬─────┘
//!    miss │ (또는 cache 오류)
//!   ┌─────▼──────────┐
//!   │ inner provider │
//!   └─────┬──────────┘
//!   ┌─────▼─────┐
//!   │ cache put │ (실패는 로그만)
//!   └─────┬─────┘
//!         ▼
//!        반환
//! ```

use async_trait::async_trait;
use ticker_core::Candle;
use tracing::{debug, warn};

use crate::error::Result;
use crate::provider::SeedSeriesProvider;
use crate::storage::redis::RedisCache;

/// 시계열 저장소 추상화.
#[async_trait]
pub trait SeriesCache: Send + Sync {
    /// 캐시된 시계열 조회.
    async fn get_series(&self, key: &str) -> Result<Option<Vec<Candle>>>;

    /// 시계열 저장.
    async fn put_series(&self, key: &str, series: &[Candle], ttl_secs: u64) -> Result<()>;
}

#[async_trait]
impl SeriesCache for RedisCache {
    async fn get_series(&self, key: &str) -> Result<Option<Vec<Candle>>> {
        self.get(key).await
    }

    async fn put_series(&self, key: &str, series: &[Candle], ttl_secs: u64) -> Result<()> {
        self.set_with_ttl(key, series, ttl_secs).await
    }
}

/// cache-aside 시드 제공자.
pub struct CachedSeedProvider<P, C> {
    inner: P,
    cache: C,
    ttl_secs: u64,
}

impl<P, C> CachedSeedProvider<P, C>
where
    P: SeedSeriesProvider,
    C: SeriesCache,
{
    /// 새 cache-aside 제공자 생성.
    pub fn new(inner: P, cache: C, ttl_secs: u64) -> Self {
        Self {
            inner,
            cache,
            ttl_secs,
        }
    }

    fn cache_key(symbol: &str) -> String {
        format!("seed:daily:{}", symbol.to_uppercase())
    }
}

#[async_trait]
impl<P, C> SeedSeriesProvider for CachedSeedProvider<P, C>
where
    P: SeedSeriesProvider,
    C: SeriesCache,
{
    async fn fetch_seed_series(&self, symbol: &str) -> Result<Vec<Candle>> {
        let key = Self::cache_key(symbol);

        match self.cache.get_series(&key).await {
            Ok(Some(series)) if !series.is_empty() => {
                debug!(symbol = %symbol, "Seed series cache hit");
                return Ok(series);
            }
            Ok(_) => debug!(symbol = %symbol, "Seed series cache miss"),
            Err(e) => warn!(symbol = %symbol, error = %e, "Seed cache read failed, falling back"),
        }

        let series = self.inner.fetch_seed_series(symbol).await?;

        if let Err(e) = self.cache.put_series(&key, &series, self.ttl_secs).await {
            warn!(symbol = %symbol, error = %e, "Seed cache write failed");
        }

        Ok(series)
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}
