//! Market data abstraction: mark prices, candlesticks and open interest.

use crate::domain::{Decimal, Instrument, Kline, MarketSnapshot};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

pub mod binance;
pub mod cache;
pub mod mock;

pub use binance::BinanceMarketData;
pub use cache::{CachedMarketData, TtlCache};
pub use mock::MockMarketData;

/// Read-only market data provider.
///
/// Implementations do not retry; callers bound every call with a timeout.
#[async_trait]
pub trait MarketData: Send + Sync + fmt::Debug {
    /// Current mark price.
    async fn price(&self, instrument: &Instrument) -> Result<Decimal, MarketDataError>;

    /// The most recent `limit` candles, oldest first.
    async fn klines(
        &self,
        instrument: &Instrument,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Kline>, MarketDataError>;

    /// Open interest in quote currency, `None` if the venue does not report it.
    async fn open_interest_notional(
        &self,
        instrument: &Instrument,
    ) -> Result<Option<Decimal>, MarketDataError>;

    /// Price plus open interest. A failed open-interest lookup degrades to `None`.
    async fn snapshot(&self, instrument: &Instrument) -> Result<MarketSnapshot, MarketDataError> {
        let price = self.price(instrument).await?;
        let open_interest_notional = match self.open_interest_notional(instrument).await {
            Ok(oi) => oi,
            Err(e) => {
                tracing::debug!(instrument = %instrument, error = %e, "Open interest unavailable");
                None
            }
        };
        Ok(MarketSnapshot {
            instrument: instrument.clone(),
            price,
            open_interest_notional,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarketDataError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Unknown instrument: {0}")]
    UnknownInstrument(Instrument),
}
