// =============================================================================
// Binance Funding Rate Source — perpetual futures funding via fapi
// =============================================================================
//
// Funding rates are periodic payments between longs and shorts that anchor
// the perpetual contract price to spot. Binance reports the rate as a raw
// fraction (0.0001 = 0.01 %); this adapter owns the ×100 conversion so the
// rest of the engine works exclusively in percentage units.
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::SignalSource;

/// Default timeout for funding-rate requests.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Fetches funding rates from the Binance Futures API.
pub struct BinanceFundingSource {
    client: reqwest::Client,
    base_url: String,
}

impl BinanceFundingSource {
    /// Create a new source with a default HTTP client.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT_SECS)
    }

    /// Create a source whose requests time out after `timeout_secs`.
    pub fn with_timeout(timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_secs))
                .build()
                .expect("failed to build reqwest client for BinanceFundingSource"),
            base_url: "https://fapi.binance.com".to_string(),
        }
    }

    /// Create a source that re-uses an existing HTTP client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: "https://fapi.binance.com".to_string(),
        }
    }

    /// Map a market symbol to Binance's pair format ("BTC/USDT" -> "BTCUSDT").
    fn api_symbol(symbol: &str) -> String {
        symbol.replace('/', "").to_uppercase()
    }

    /// Extract the latest funding rate from a fundingRate response body and
    /// convert it from a raw fraction to percentage units.
    fn parse_rate_pct(body: &serde_json::Value) -> Result<f64> {
        let arr = body
            .as_array()
            .context("funding rate response is not an array")?;
        let entry = arr
            .first()
            .context("funding rate response array is empty")?;

        let rate: f64 = entry["fundingRate"]
            .as_str()
            .context("funding rate entry missing 'fundingRate'")?
            .parse()
            .context("failed to parse 'fundingRate' as f64")?;

        Ok(rate * 100.0)
    }
}

#[async_trait]
impl SignalSource for BinanceFundingSource {
    async fn fetch_value(&self, symbol: &str) -> Result<f64> {
        let url = format!(
            "{}/fapi/v1/fundingRate?symbol={}&limit=1",
            self.base_url,
            Self::api_symbol(symbol)
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET funding rate for {symbol}"))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse funding rate response body")?;

        if !status.is_success() {
            anyhow::bail!("funding rate API returned {}: {}", status, body);
        }

        let rate_pct = Self::parse_rate_pct(&body)?;

        debug!(
            symbol,
            rate_pct = format!("{:.4}", rate_pct),
            "funding rate fetched"
        );

        Ok(rate_pct)
    }
}

impl Default for BinanceFundingSource {
    fn default() -> Self {
        Self::new()
    }
}
