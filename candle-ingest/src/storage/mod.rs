//! Storage layer
//!
//! Connection pooling, the candle persistence gateway, the cached read path
//! and schema bootstrap.

mod pool;
mod query;
mod repository;
mod schema;

pub use pool::*;
pub use query::*;
pub use repository::*;
pub use schema::*;
