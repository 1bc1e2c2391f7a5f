//! Logging configuration and initialization.

use std::convert::Infallible;
use std::env;
use std::str::FromStr;

use tracing::Subscriber;
use tracing_subscriber::fmt::time::{ChronoLocal, ChronoUtc, FormatTime};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Directives appended to the default filter so dependency chatter stays out
/// of backfill logs unless `RUST_LOG` asks for it
const QUIET_DEPENDENCIES: &[&str] = &["sqlx=warn", "hyper=warn", "reqwest=warn", "rustls=warn"];

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    /// One JSON object per event, for log shipping
    Json,
}

impl FromStr for LogFormat {
    type Err = Infallible;

    /// Unknown values fall back to `Pretty`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        })
    }
}

/// Timestamp rendering for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampFormat {
    #[default]
    Local,
    Utc,
    None,
}

impl FromStr for TimestampFormat {
    type Err = Infallible;

    /// Unknown values fall back to `Local`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "utc" => TimestampFormat::Utc,
            "none" | "off" => TimestampFormat::None,
            _ => TimestampFormat::Local,
        })
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    pub timestamps: TimestampFormat,
    /// Filter used when `RUST_LOG` is unset
    pub default_level: String,
    /// file:line on every event
    pub include_location: bool,
    pub include_thread_ids: bool,
    pub include_target: bool,
    /// Logged once when the subscriber is installed
    pub app_name: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            timestamps: TimestampFormat::Local,
            default_level: "info".to_string(),
            include_location: false,
            include_thread_ids: false,
            include_target: true,
            app_name: None,
        }
    }
}

fn env_parse<T: FromStr + Default>(name: &str) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_default()
}

fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(s) => matches!(s.trim(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

impl LogConfig {
    /// Read `LOG_FORMAT`, `LOG_TIMESTAMPS`, `LOG_LEVEL`, `LOG_LOCATION`,
    /// `LOG_THREAD_IDS` and `LOG_APP_NAME`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            format: env_parse("LOG_FORMAT"),
            timestamps: env_parse("LOG_TIMESTAMPS"),
            default_level: env::var("LOG_LEVEL").unwrap_or(defaults.default_level),
            include_location: env_flag("LOG_LOCATION", defaults.include_location),
            include_thread_ids: env_flag("LOG_THREAD_IDS", defaults.include_thread_ids),
            include_target: defaults.include_target,
            app_name: env::var("LOG_APP_NAME").ok(),
        }
    }

    /// JSON with UTC timestamps and thread ids, for the long-running service
    pub fn service() -> Self {
        Self {
            format: LogFormat::Json,
            timestamps: TimestampFormat::Utc,
            include_thread_ids: true,
            ..Default::default()
        }
    }

    /// Compact lines without timestamps, for one-shot commands
    pub fn cli() -> Self {
        Self {
            format: LogFormat::Compact,
            timestamps: TimestampFormat::None,
            include_target: false,
            ..Default::default()
        }
    }

    /// Set the application name unless `LOG_APP_NAME` already did
    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name.get_or_insert_with(|| name.into());
        self
    }

    pub fn with_default_level(mut self, level: impl Into<String>) -> Self {
        self.default_level = level.into();
        self
    }

    /// Default filter string: the configured level plus quiet dependency directives
    pub fn default_directives(&self) -> String {
        std::iter::once(self.default_level.as_str())
            .chain(QUIET_DEPENDENCIES.iter().copied())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over [`LogConfig::default_directives`]. Fails when a
/// subscriber is already installed.
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.default_directives())?,
    };

    let layer = match config.timestamps {
        TimestampFormat::Local => {
            fmt_layer(&config, ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f %z".to_string()))
        }
        TimestampFormat::Utc => {
            fmt_layer(&config, ChronoUtc::new("%Y-%m-%dT%H:%M:%S%.3fZ".to_string()))
        }
        TimestampFormat::None => fmt_layer(&config, ()),
    };

    tracing_subscriber::registry().with(filter).with(layer).try_init()?;

    if let Some(app) = &config.app_name {
        tracing::info!(app = %app, format = ?config.format, "Logging initialized");
    }
    Ok(())
}

fn fmt_layer<S, T>(config: &LogConfig, timer: T) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    T: FormatTime + Send + Sync + 'static,
{
    let ansi = atty::is(atty::Stream::Stdout);
    let layer = fmt::layer()
        .with_timer(timer)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    match config.format {
        LogFormat::Json => layer.json().flatten_event(true).with_ansi(false).boxed(),
        LogFormat::Compact => layer.compact().with_ansi(ansi).boxed(),
        LogFormat::Pretty => layer.with_ansi(ansi).boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formats_parse_leniently() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!(" compact ".parse::<LogFormat>(), Ok(LogFormat::Compact));
        assert_eq!("fancy".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert_eq!("UTC".parse::<TimestampFormat>(), Ok(TimestampFormat::Utc));
        assert_eq!("off".parse::<TimestampFormat>(), Ok(TimestampFormat::None));
    }

    #[test]
    fn test_presets() {
        let service = LogConfig::service();
        assert_eq!(service.format, LogFormat::Json);
        assert_eq!(service.timestamps, TimestampFormat::Utc);

        let cli = LogConfig::cli();
        assert_eq!(cli.format, LogFormat::Compact);
        assert!(!cli.include_target);
    }

    #[test]
    fn test_default_directives_quiet_dependencies() {
        let config = LogConfig::default().with_default_level("candle_ingest=debug");
        let directives = config.default_directives();

        assert!(directives.starts_with("candle_ingest=debug,"));
        assert!(directives.contains("sqlx=warn"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn test_app_name_keeps_configured_value() {
        let config = LogConfig {
            app_name: Some("from-env".to_string()),
            ..Default::default()
        }
        .with_app_name("candle-ingest");
        assert_eq!(config.app_name.as_deref(), Some("from-env"));

        let config = LogConfig::default().with_app_name("candle-ingest");
        assert_eq!(config.app_name.as_deref(), Some("candle-ingest"));
    }
}
