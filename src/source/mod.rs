// =============================================================================
// Signal Source — where funding rates come from
// =============================================================================
//
// The monitor loop only sees this trait: fetch a number for a symbol or fail.
// The concrete Binance adapter lives in `binance_funding`; tests plug in
// in-memory sources.
//
// Unit contract: implementations return the funding rate in PERCENTAGE units
// (0.01 means 0.01 %), the same units users enter thresholds in. Exchange
// APIs that report a raw fraction must scale by 100 inside the adapter —
// callers never convert.

pub mod binance_funding;

pub use binance_funding::BinanceFundingSource;

use anyhow::Result;
use async_trait::async_trait;

/// Provider of the numeric signal rules are evaluated against.
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Fetch the current signal value for `symbol`, in percentage units.
    ///
    /// Any error (including timeout) is a per-symbol fetch failure: the
    /// monitor reports it to the affected user and moves on.
    async fn fetch_value(&self, symbol: &str) -> Result<f64>;
}
