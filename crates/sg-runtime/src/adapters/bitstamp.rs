//! BTC/USD rate from the Bitstamp public ticker.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use sg_gateway::{RateError, RateSource};
use std::time::Duration;

/// Public ticker endpoint
pub const TICKER_URL: &str = "https://www.bitstamp.net/api/v2/ticker/btcusd";

#[derive(Debug, Deserialize)]
struct Ticker {
    last: String,
}

/// Rate source backed by the Bitstamp ticker.
pub struct BitstampRates {
    client: Client,
    url: String,
}

impl BitstampRates {
    pub fn new() -> Result<Self, RateError> {
        Self::with_url(TICKER_URL)
    }

    pub fn with_url(url: impl Into<String>) -> Result<Self, RateError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| RateError(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl RateSource for BitstampRates {
    async fn fetch_rate(&self) -> Result<String, RateError> {
        let ticker: Ticker = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| RateError(format!("ticker request failed: {e}")))?
            .json()
            .await
            .map_err(|e| RateError(format!("ticker response unreadable: {e}")))?;

        parse_rate(ticker)
    }
}

fn parse_rate(ticker: Ticker) -> Result<String, RateError> {
    let rate = ticker.last.trim();
    if rate.parse::<f64>().is_err() {
        return Err(RateError(format!("ticker rate '{rate}' is not a number")));
    }
    Ok(rate.to_string())
}
