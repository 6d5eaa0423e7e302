//! Public USDT-margined futures REST endpoints.

use super::{MarketData, MarketDataError};
use crate::domain::{Decimal, Instrument, Kline};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct BinanceMarketData {
    client: Client,
    base_url: String,
}

impl BinanceMarketData {
    /// Create a client whose every request is bounded by `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, MarketDataError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MarketDataError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn default_url(timeout: Duration) -> Result<Self, MarketDataError> {
        Self::new("https://fapi.binance.com", timeout)
    }

    async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value, MarketDataError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| MarketDataError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(MarketDataError::Http {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| MarketDataError::Parse(e.to_string()))
    }
}

#[async_trait]
impl MarketData for BinanceMarketData {
    async fn price(&self, instrument: &Instrument) -> Result<Decimal, MarketDataError> {
        let response = self
            .get_json(
                "/fapi/v1/ticker/price",
                &[("symbol", instrument.as_str().to_string())],
            )
            .await?;
        decimal_field(&response, "price")
    }

    async fn klines(
        &self,
        instrument: &Instrument,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Kline>, MarketDataError> {
        debug!(instrument = %instrument, interval, limit, "Fetching klines");
        let response = self
            .get_json(
                "/fapi/v1/klines",
                &[
                    ("symbol", instrument.as_str().to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        let rows = response
            .as_array()
            .ok_or_else(|| MarketDataError::Parse("Expected array response".to_string()))?;

        let mut klines = Vec::with_capacity(rows.len());
        for row in rows {
            match parse_kline(row) {
                Ok(kline) => klines.push(kline),
                Err(e) => warn!(instrument = %instrument, error = %e, "Failed to parse kline"),
            }
        }
        Ok(klines)
    }

    async fn open_interest_notional(
        &self,
        instrument: &Instrument,
    ) -> Result<Option<Decimal>, MarketDataError> {
        let response = self
            .get_json(
                "/fapi/v1/openInterest",
                &[("symbol", instrument.as_str().to_string())],
            )
            .await?;
        // Reported in base units.
        let contracts = decimal_field(&response, "openInterest")?;
        let price = self.price(instrument).await?;
        Ok(Some(contracts * price))
    }
}

fn decimal_field(value: &serde_json::Value, field: &str) -> Result<Decimal, MarketDataError> {
    let raw = value
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| MarketDataError::Parse(format!("Missing {} field", field)))?;
    Decimal::from_str_canonical(raw)
        .map_err(|e| MarketDataError::Parse(format!("Invalid {}: {}", field, e)))
}

/// One row of `/fapi/v1/klines`:
/// `[openTime, "open", "high", "low", "close", "volume", closeTime, ...]`.
fn parse_kline(row: &serde_json::Value) -> Result<Kline, MarketDataError> {
    let cells = row
        .as_array()
        .ok_or_else(|| MarketDataError::Parse("Expected kline array".to_string()))?;
    if cells.len() < 7 {
        return Err(MarketDataError::Parse(format!(
            "Kline has {} cells, expected at least 7",
            cells.len()
        )));
    }

    let int_cell = |i: usize| {
        cells[i]
            .as_i64()
            .ok_or_else(|| MarketDataError::Parse(format!("Kline cell {} is not an integer", i)))
    };
    let decimal_cell = |i: usize| {
        cells[i]
            .as_str()
            .ok_or_else(|| MarketDataError::Parse(format!("Kline cell {} is not a string", i)))
            .and_then(|s| {
                Decimal::from_str_canonical(s)
                    .map_err(|e| MarketDataError::Parse(format!("Kline cell {}: {}", i, e)))
            })
    };

    Ok(Kline {
        open_time: int_cell(0)?,
        open: decimal_cell(1)?,
        high: decimal_cell(2)?,
        low: decimal_cell(3)?,
        close: decimal_cell(4)?,
        volume: decimal_cell(5)?,
        close_time: int_cell(6)?,
    })
}
