//! Upstream candle fetchers
//!
//! [`CandleFetcher`] is the seam between the backfill and a market-data
//! provider. [`HttpCandleFetcher`] talks to a JSON endpoint; the scripted
//! fetcher in [`mock`] serves canned responses.

mod http;
pub mod mock;
mod traits;

pub use http::HttpCandleFetcher;
pub use mock::{synthetic_candles, ScriptedFetcher};
pub use traits::*;
