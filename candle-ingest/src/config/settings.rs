//! Application settings and configuration

use config::{Config, ConfigError, Environment, File, FileFormat};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::backfill::{BackfillConfig, TickMode};
use crate::resilience::{
    BackoffPolicy, BackoffStrategy, CircuitBreakerConfig, RateLimiterConfig, RetryPolicy,
};
use crate::storage::PoolConfig;
use candle_common::data::CacheConfig;
use candle_common::error::ConfigurationError;
use candle_common::quality::QualityConfig;

/// Main application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    #[serde(default)]
    pub rate_limiter: RateLimiterSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub quality: QualitySettings,
    #[serde(default)]
    pub backfill: BackfillSettings,
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// PostgreSQL connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default)]
    pub pool: PoolSettings,
}

fn default_database_url() -> String {
    std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgresql://localhost/candles".into())
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            pool: PoolSettings::default(),
        }
    }
}

/// Connection pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_max_overflow")]
    pub max_overflow: usize,
    /// Connections older than this are replaced
    #[serde(default = "default_pool_recycle_secs")]
    pub pool_recycle_secs: u64,
    #[serde(default = "default_true")]
    pub pool_pre_ping: bool,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
}

fn default_pool_size() -> usize {
    5
}

fn default_max_overflow() -> usize {
    10
}

fn default_pool_recycle_secs() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

fn default_health_check_interval_secs() -> u64 {
    30
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            max_overflow: default_max_overflow(),
            pool_recycle_secs: default_pool_recycle_secs(),
            pool_pre_ping: true,
            acquire_timeout_secs: default_acquire_timeout_secs(),
            health_check_interval_secs: default_health_check_interval_secs(),
        }
    }
}

impl PoolSettings {
    pub fn config(&self) -> PoolConfig {
        PoolConfig {
            pool_size: self.pool_size,
            max_overflow: self.max_overflow,
            recycle: Duration::from_secs(self.pool_recycle_secs),
            pre_ping: self.pool_pre_ping,
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
            health_check_interval: Duration::from_secs(self.health_check_interval_secs),
        }
    }
}

/// Upstream provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Base URL of the candle endpoint
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,
    /// Transport-level timeout for one HTTP request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_provider_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: default_provider_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ProviderSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Retry settings shared by fetches and persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default)]
    pub strategy: BackoffStrategy,
    #[serde(default = "default_true")]
    pub jitter: bool,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            strategy: BackoffStrategy::default(),
            jitter: true,
        }
    }
}

impl RetrySettings {
    /// Retry policy with the given per-attempt deadline
    pub fn policy(&self, attempt_timeout: Option<Duration>) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: BackoffPolicy {
                strategy: self.strategy,
                base: Duration::from_millis(self.initial_backoff_ms),
                max_delay: Duration::from_millis(self.max_backoff_ms),
                jitter: self.jitter,
            },
            attempt_timeout,
        }
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Time spent open before a trial call is allowed
    #[serde(default = "default_breaker_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_breaker_timeout_secs() -> u64 {
    60
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            timeout_secs: default_breaker_timeout_secs(),
        }
    }
}

impl CircuitBreakerSettings {
    pub fn config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

/// Provider rate limit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterSettings {
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
}

fn default_max_requests() -> u32 {
    60
}

fn default_window_seconds() -> u64 {
    60
}

impl Default for RateLimiterSettings {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_seconds: default_window_seconds(),
        }
    }
}

impl RateLimiterSettings {
    pub fn config(&self) -> RateLimiterConfig {
        RateLimiterConfig::new(self.max_requests, Duration::from_secs(self.window_seconds))
    }
}

/// Read-path query cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_cache_max_size() -> usize {
    1000
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            max_size: default_cache_max_size(),
        }
    }
}

impl CacheSettings {
    pub fn config(&self) -> CacheConfig {
        CacheConfig {
            ttl: Duration::from_secs(self.ttl_secs),
            max_size: self.max_size,
        }
    }
}

/// Quality engine thresholds and penalties
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySettings {
    pub validated_threshold: Decimal,
    pub missing_field_penalty: Decimal,
    pub anomaly_penalty: Decimal,
    pub reverse_split_penalty: Decimal,
    pub price_spike_threshold: Decimal,
    pub intraday_range_threshold: Decimal,
    pub reverse_split_threshold: Decimal,
    pub volume_high_multiple: Decimal,
    pub volume_low_multiple: Decimal,
    pub gap_threshold_business_days: u32,
}

impl Default for QualitySettings {
    fn default() -> Self {
        let d = QualityConfig::default();
        Self {
            validated_threshold: d.validated_threshold,
            missing_field_penalty: d.missing_field_penalty,
            anomaly_penalty: d.anomaly_penalty,
            reverse_split_penalty: d.reverse_split_penalty,
            price_spike_threshold: d.price_spike_threshold,
            intraday_range_threshold: d.intraday_range_threshold,
            reverse_split_threshold: d.reverse_split_threshold,
            volume_high_multiple: d.volume_high_multiple,
            volume_low_multiple: d.volume_low_multiple,
            gap_threshold_business_days: d.gap_threshold_business_days,
        }
    }
}

impl QualitySettings {
    pub fn config(&self) -> QualityConfig {
        QualityConfig {
            validated_threshold: self.validated_threshold,
            missing_field_penalty: self.missing_field_penalty,
            anomaly_penalty: self.anomaly_penalty,
            reverse_split_penalty: self.reverse_split_penalty,
            price_spike_threshold: self.price_spike_threshold,
            intraday_range_threshold: self.intraday_range_threshold,
            reverse_split_threshold: self.reverse_split_threshold,
            volume_high_multiple: self.volume_high_multiple,
            volume_low_multiple: self.volume_low_multiple,
            gap_threshold_business_days: self.gap_threshold_business_days,
        }
    }
}

/// Backfill scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillSettings {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Deadline for one fetch attempt; expiry counts as a transient failure
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_lookback_days")]
    pub default_lookback_days: i64,
    /// Only process pending and failed pairs
    #[serde(default)]
    pub resume: bool,
}

fn default_tick_interval_secs() -> u64 {
    3600
}

fn default_fetch_timeout_secs() -> u64 {
    60
}

fn default_lookback_days() -> i64 {
    365
}

impl Default for BackfillSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            default_lookback_days: default_lookback_days(),
            resume: false,
        }
    }
}

impl BackfillSettings {
    pub fn config(&self) -> BackfillConfig {
        BackfillConfig {
            default_lookback: chrono::Duration::days(self.default_lookback_days),
            mode: if self.resume {
                TickMode::Resume
            } else {
                TickMode::Full
            },
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

fn require_positive(field: &str, value: u64) -> Result<(), ConfigurationError> {
    if value == 0 {
        return Err(ConfigurationError::invalid_value(field, "must be greater than zero"));
    }
    Ok(())
}

fn require_unit_interval(field: &str, value: Decimal) -> Result<(), ConfigurationError> {
    if value < Decimal::ZERO || value > Decimal::ONE {
        return Err(ConfigurationError::invalid_value(field, "must be within [0, 1]"));
    }
    Ok(())
}

impl Settings {
    /// Load settings from configuration files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_prefix("CANDLE_INGEST")
    }

    /// Load settings with a custom environment variable prefix
    pub fn load_with_prefix(env_prefix: &str) -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config_dir = Self::config_dir();

        let s = Config::builder()
            .add_source(File::with_name(&format!("{}/default", config_dir)).required(false))
            .add_source(File::with_name(&format!("{}/{}", config_dir, run_mode)).required(false))
            // Local overrides, not checked into git
            .add_source(File::with_name(&format!("{}/local", config_dir)).required(false))
            // e.g. CANDLE_INGEST__RETRY__MAX_RETRIES=5
            .add_source(
                Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }

    /// Parse settings from a TOML document; missing fields take their defaults
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    fn config_dir() -> String {
        std::env::var("CANDLE_INGEST_CONFIG_DIR").unwrap_or_else(|_| "config".into())
    }

    /// Reject out-of-range values once at start-up
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigurationError::MissingField("database.url".into()));
        }
        require_positive("database.pool.pool_size", self.database.pool.pool_size as u64)?;
        require_positive(
            "database.pool.acquire_timeout_secs",
            self.database.pool.acquire_timeout_secs,
        )?;
        require_positive(
            "database.pool.health_check_interval_secs",
            self.database.pool.health_check_interval_secs,
        )?;

        if self.provider.base_url.trim().is_empty() {
            return Err(ConfigurationError::MissingField("provider.base_url".into()));
        }
        require_positive("provider.request_timeout_secs", self.provider.request_timeout_secs)?;

        require_positive("retry.initial_backoff_ms", self.retry.initial_backoff_ms)?;
        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err(ConfigurationError::invalid_value(
                "retry.max_backoff_ms",
                "must not be below retry.initial_backoff_ms",
            ));
        }

        require_positive(
            "circuit_breaker.failure_threshold",
            self.circuit_breaker.failure_threshold.into(),
        )?;
        require_positive(
            "circuit_breaker.success_threshold",
            self.circuit_breaker.success_threshold.into(),
        )?;
        require_positive("circuit_breaker.timeout_secs", self.circuit_breaker.timeout_secs)?;

        require_positive("rate_limiter.max_requests", self.rate_limiter.max_requests.into())?;
        require_positive("rate_limiter.window_seconds", self.rate_limiter.window_seconds)?;

        require_positive("cache.ttl_secs", self.cache.ttl_secs)?;
        require_positive("cache.max_size", self.cache.max_size as u64)?;

        let q = &self.quality;
        require_unit_interval("quality.validated_threshold", q.validated_threshold)?;
        require_unit_interval("quality.missing_field_penalty", q.missing_field_penalty)?;
        require_unit_interval("quality.anomaly_penalty", q.anomaly_penalty)?;
        require_unit_interval("quality.reverse_split_penalty", q.reverse_split_penalty)?;
        for (field, value) in [
            ("quality.price_spike_threshold", q.price_spike_threshold),
            ("quality.intraday_range_threshold", q.intraday_range_threshold),
            ("quality.reverse_split_threshold", q.reverse_split_threshold),
            ("quality.volume_high_multiple", q.volume_high_multiple),
            ("quality.volume_low_multiple", q.volume_low_multiple),
        ] {
            if value <= Decimal::ZERO {
                return Err(ConfigurationError::invalid_value(field, "must be positive"));
            }
        }
        if q.volume_low_multiple >= q.volume_high_multiple {
            return Err(ConfigurationError::Invalid(
                "quality.volume_low_multiple must be below quality.volume_high_multiple".into(),
            ));
        }

        require_positive("backfill.tick_interval_secs", self.backfill.tick_interval_secs)?;
        require_positive("backfill.fetch_timeout_secs", self.backfill.fetch_timeout_secs)?;
        if self.backfill.default_lookback_days <= 0 {
            return Err(ConfigurationError::invalid_value(
                "backfill.default_lookback_days",
                "must be positive",
            ));
        }

        Ok(())
    }
}
