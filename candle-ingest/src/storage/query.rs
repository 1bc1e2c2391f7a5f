//! Cached read path

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::repository::{CandleQuery, CandleStore, StorageResult};
use candle_common::data::{CacheConfig, CacheStats, Candle, QueryCache};

/// Serves range queries from the query cache, falling through to the store
/// on a miss. Writes never invalidate entries; staleness is bounded by the TTL.
pub struct CandleQueryService {
    store: Arc<dyn CandleStore>,
    cache: QueryCache<Arc<Vec<Candle>>>,
    ttl: Duration,
}

impl CandleQueryService {
    pub fn new(store: Arc<dyn CandleStore>, config: CacheConfig) -> Self {
        Self {
            store,
            ttl: config.ttl,
            cache: QueryCache::new(config),
        }
    }

    pub async fn query(&self, query: &CandleQuery) -> StorageResult<Arc<Vec<Candle>>> {
        let key = query.cache_key();
        let store = &self.store;

        let candles = self
            .cache
            .get_or_compute(&key, self.ttl, || async move {
                debug!(symbol = %query.symbol, timeframe = %query.timeframe, "Query cache miss");
                store.query_range(query).await.map(Arc::new)
            })
            .await?;
        Ok(candles)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn cache(&self) -> &QueryCache<Arc<Vec<Candle>>> {
        &self.cache
    }
}
