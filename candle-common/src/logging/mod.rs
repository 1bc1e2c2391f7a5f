//! Tracing subscriber setup shared by the candle binaries.
//!
//! Output is pretty, compact or JSON, selected from the environment:
//!
//! - `RUST_LOG`: full filter; overrides everything below
//! - `LOG_LEVEL`: default filter when `RUST_LOG` is unset
//! - `LOG_FORMAT`: `pretty` (default), `compact` or `json`
//! - `LOG_TIMESTAMPS`: `local` (default), `utc` or `none`
//!
//! ```rust,ignore
//! use candle_common::logging::{init_logging, LogConfig};
//!
//! init_logging(LogConfig::from_env().with_app_name("candle-ingest"))?;
//! ```

mod config;

pub use config::{init_logging, LogConfig, LogFormat, TimestampFormat};
