//! Mock market data for testing without network calls.

use super::{MarketData, MarketDataError};
use crate::domain::{Decimal, Instrument, Kline};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// In-memory prices, candles and open interest. Prices can be moved while a
/// test runs; every `klines` call is counted.
#[derive(Debug, Clone, Default)]
pub struct MockMarketData {
    prices: Arc<RwLock<HashMap<Instrument, Decimal>>>,
    open_interest: HashMap<Instrument, Decimal>,
    klines: HashMap<Instrument, Vec<Kline>>,
    failing: bool,
    kline_calls: Arc<AtomicUsize>,
}

impl MockMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(self, instrument: Instrument, price: Decimal) -> Self {
        self.set_price(instrument, price);
        self
    }

    pub fn with_open_interest(mut self, instrument: Instrument, notional: Decimal) -> Self {
        self.open_interest.insert(instrument, notional);
        self
    }

    pub fn with_klines(mut self, instrument: Instrument, klines: Vec<Kline>) -> Self {
        self.klines.insert(instrument, klines);
        self
    }

    /// Every call fails with a network error.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    /// Move the mark price; visible to every clone.
    pub fn set_price(&self, instrument: Instrument, price: Decimal) {
        let mut prices = self.prices.write().unwrap_or_else(|e| e.into_inner());
        prices.insert(instrument, price);
    }

    pub fn kline_calls(&self) -> usize {
        self.kline_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), MarketDataError> {
        if self.failing {
            Err(MarketDataError::Network("mock market data unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MarketData for MockMarketData {
    async fn price(&self, instrument: &Instrument) -> Result<Decimal, MarketDataError> {
        self.check()?;
        let prices = self.prices.read().unwrap_or_else(|e| e.into_inner());
        prices
            .get(instrument)
            .copied()
            .ok_or_else(|| MarketDataError::UnknownInstrument(instrument.clone()))
    }

    async fn klines(
        &self,
        instrument: &Instrument,
        _interval: &str,
        limit: usize,
    ) -> Result<Vec<Kline>, MarketDataError> {
        self.kline_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let all = self
            .klines
            .get(instrument)
            .ok_or_else(|| MarketDataError::UnknownInstrument(instrument.clone()))?;
        let start = all.len().saturating_sub(limit);
        Ok(all[start..].to_vec())
    }

    async fn open_interest_notional(
        &self,
        instrument: &Instrument,
    ) -> Result<Option<Decimal>, MarketDataError> {
        self.check()?;
        Ok(self.open_interest.get(instrument).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_price_shared_between_clones() {
        let btc = Instrument::new("BTCUSDT");
        let market = MockMarketData::new().with_price(btc.clone(), Decimal::from(100i64));
        let clone = market.clone();
        market.set_price(btc.clone(), Decimal::from(120i64));
        assert_eq!(clone.price(&btc).await.unwrap(), Decimal::from(120i64));
    }

    #[tokio::test]
    async fn test_snapshot_without_open_interest() {
        let eth = Instrument::new("ETHUSDT");
        let market = MockMarketData::new().with_price(eth.clone(), Decimal::from(2500i64));
        let snapshot = market.snapshot(&eth).await.unwrap();
        assert_eq!(snapshot.price, Decimal::from(2500i64));
        assert_eq!(snapshot.open_interest_notional, None);
    }

    #[tokio::test]
    async fn test_failing_market() {
        let market = MockMarketData::new().failing();
        let err = market.price(&Instrument::new("BTCUSDT")).await.unwrap_err();
        assert!(matches!(err, MarketDataError::Network(_)));
    }
}
