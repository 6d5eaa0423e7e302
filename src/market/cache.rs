//! Short-lived read-through cache in front of market data.

use super::{MarketData, MarketDataError};
use crate::domain::{Decimal, Instrument, Kline};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;

/// String-keyed cache whose entries expire `ttl` after insertion.
///
/// Values go in and come out by clone, so no caller ever holds a reference
/// into cached storage.
#[derive(Debug)]
pub struct TtlCache<V: Clone> {
    ttl: Duration,
    entries: RwLock<HashMap<String, (Instant, V)>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(key)
            .filter(|(expires_at, _)| Instant::now() < *expires_at)
            .map(|(_, value)| value.clone())
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        entries.retain(|_, (expires_at, _)| now < *expires_at);
        entries.insert(key.into(), (now + self.ttl, value));
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Caches `klines` responses; prices and open interest pass straight through.
#[derive(Debug)]
pub struct CachedMarketData {
    inner: Arc<dyn MarketData>,
    klines: TtlCache<Vec<Kline>>,
}

impl CachedMarketData {
    pub fn new(inner: Arc<dyn MarketData>, ttl: Duration) -> Self {
        Self {
            inner,
            klines: TtlCache::new(ttl),
        }
    }

    /// Intervals are case-sensitive upstream ("1m" is a minute, "1M" a month).
    fn kline_key(instrument: &Instrument, interval: &str, limit: usize) -> String {
        format!("{}|{}|{}", instrument.as_str().to_ascii_uppercase(), interval, limit)
    }
}

#[async_trait]
impl MarketData for CachedMarketData {
    async fn price(&self, instrument: &Instrument) -> Result<Decimal, MarketDataError> {
        self.inner.price(instrument).await
    }

    async fn klines(
        &self,
        instrument: &Instrument,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Kline>, MarketDataError> {
        let key = Self::kline_key(instrument, interval, limit);
        if let Some(cached) = self.klines.get(&key) {
            debug!(key = %key, "Kline cache hit");
            return Ok(cached);
        }

        let fresh = self.inner.klines(instrument, interval, limit).await?;
        self.klines.set(key, fresh.clone());
        Ok(fresh)
    }

    async fn open_interest_notional(
        &self,
        instrument: &Instrument,
    ) -> Result<Option<Decimal>, MarketDataError> {
        self.inner.open_interest_notional(instrument).await
    }
}
