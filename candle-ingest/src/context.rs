//! Application context
//!
//! Built once at start-up from validated [`Settings`] and handed to every
//! command. All shared state lives here behind `Arc`s.

use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::backfill::BackfillOrchestrator;
use crate::config::Settings;
use crate::provider::{CandleFetcher, FetchError, HttpCandleFetcher};
use crate::resilience::{CircuitBreaker, SlidingWindowRateLimiter};
use crate::scheduler::TickScheduler;
use crate::storage::{CandleQueryService, CandleStore, PgPoolManager, PostgresCandleStore};
use crate::symbol::{PostgresSymbolRegistry, SymbolRegistry};
use candle_common::error::{ConfigurationError, DatabaseError};
use candle_common::quality::QualityEngine;

/// Failures while assembling the context
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Invalid configuration: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Could not build provider client: {0}")]
    Fetcher(#[from] FetchError),

    #[error("Could not build connection pool: {0}")]
    Database(#[from] DatabaseError),
}

/// Shared handles for one process
pub struct AppContext {
    pub settings: Settings,
    /// Present when backed by PostgreSQL
    pub pool: Option<PgPoolManager>,
    pub store: Arc<dyn CandleStore>,
    pub registry: Arc<dyn SymbolRegistry>,
    pub fetcher: Arc<dyn CandleFetcher>,
    pub quality: Arc<QualityEngine>,
    pub rate_limiter: Arc<SlidingWindowRateLimiter>,
    pub fetch_breaker: Arc<CircuitBreaker>,
    pub storage_breaker: Arc<CircuitBreaker>,
    pub orchestrator: Arc<BackfillOrchestrator>,
    pub queries: Arc<CandleQueryService>,
}

impl AppContext {
    /// PostgreSQL storage and registry with the HTTP fetcher.
    ///
    /// Connections are opened lazily, so this does not touch the database.
    pub fn connect(settings: Settings) -> Result<Self, ContextError> {
        settings.validate()?;

        let pool = PgPoolManager::new(&settings.database.url, settings.database.pool.config())?;
        let fetcher = HttpCandleFetcher::new(
            settings.provider.base_url.clone(),
            settings.provider.request_timeout(),
        )?;

        info!(provider = %settings.provider.base_url, "Building application context");

        Ok(Self::from_parts(
            settings,
            Some(pool.clone()),
            Arc::new(PostgresCandleStore::new(pool.clone())),
            Arc::new(PostgresSymbolRegistry::new(pool)),
            Arc::new(fetcher),
        ))
    }

    /// Wire the shared components around the given collaborators
    pub fn from_parts(
        settings: Settings,
        pool: Option<PgPoolManager>,
        store: Arc<dyn CandleStore>,
        registry: Arc<dyn SymbolRegistry>,
        fetcher: Arc<dyn CandleFetcher>,
    ) -> Self {
        let quality = Arc::new(QualityEngine::new(settings.quality.config()));
        let rate_limiter = Arc::new(SlidingWindowRateLimiter::new(settings.rate_limiter.config()));
        let fetch_breaker = Arc::new(CircuitBreaker::new(
            format!("fetch:{}", fetcher.name()),
            settings.circuit_breaker.config(),
        ));
        let storage_breaker = Arc::new(CircuitBreaker::new(
            "storage",
            settings.circuit_breaker.config(),
        ));

        let orchestrator = BackfillOrchestrator::builder(
            registry.clone(),
            fetcher.clone(),
            store.clone(),
        )
        .quality_engine(quality.clone())
        .fetch_retry(settings.retry.policy(Some(settings.backfill.fetch_timeout())))
        .persist_retry(settings.retry.policy(None))
        .fetch_breaker(fetch_breaker.clone())
        .storage_breaker(storage_breaker.clone())
        .rate_limiter(rate_limiter.clone())
        .config(settings.backfill.config())
        .build();

        let queries = Arc::new(CandleQueryService::new(store.clone(), settings.cache.config()));

        Self {
            settings,
            pool,
            store,
            registry,
            fetcher,
            quality,
            rate_limiter,
            fetch_breaker,
            storage_breaker,
            orchestrator: Arc::new(orchestrator),
            queries,
        }
    }

    pub fn scheduler(&self) -> TickScheduler {
        TickScheduler::new(
            self.orchestrator.clone(),
            self.settings.backfill.tick_interval(),
        )
    }
}
