//! HTTP fetcher for JSON candle endpoints

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use super::traits::{CandleFetcher, FetchError, FetchResult};
use candle_common::data::{RawCandle, Timeframe};

/// Fetches candles from `GET {base_url}/candles?symbol=..&timeframe=..&start=..&end=..`,
/// expecting a JSON array of raw candles.
#[derive(Debug, Clone)]
pub struct HttpCandleFetcher {
    client: Client,
    base_url: String,
    request_timeout: Duration,
}

impl HttpCandleFetcher {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> FetchResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn map_send_error(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.request_timeout)
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl CandleFetcher for HttpCandleFetcher {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> FetchResult<Vec<RawCandle>> {
        let url = format!("{}/candles", self.base_url);
        let start = start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let end = end.to_rfc3339_opts(SecondsFormat::Secs, true);

        debug!(%url, symbol, %timeframe, %start, %end, "Fetching candles");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol),
                ("timeframe", timeframe.as_str()),
                ("start", start.as_str()),
                ("end", end.as_str()),
            ])
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();

            return Err(match FetchError::from_status(status.as_u16(), body) {
                FetchError::RateLimited { .. } if status == StatusCode::TOO_MANY_REQUESTS => {
                    FetchError::RateLimited { retry_after }
                }
                other => other,
            });
        }

        response
            .json::<Vec<RawCandle>>()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(self.request_timeout)
                } else {
                    FetchError::Malformed(e.to_string())
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let fetcher =
            HttpCandleFetcher::new("http://localhost:8080/", Duration::from_secs(5)).unwrap();
        assert_eq!(fetcher.base_url(), "http://localhost:8080");
        assert_eq!(fetcher.name(), "http");
    }
}
