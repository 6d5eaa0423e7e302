//! Account and market views supplied by external collaborators.

use crate::domain::{Decimal, Direction, Instrument, OpenPositionKey};
use serde::{Deserialize, Serialize};

/// Account state as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub equity: Decimal,
    pub available_balance: Decimal,
    /// Restricted sub-account: subject to the absolute leverage ceiling.
    pub restricted: bool,
}

/// An open position as the exchange perceives it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub instrument: Instrument,
    pub direction: Direction,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub leverage: u32,
}

impl ExchangePosition {
    pub fn key(&self) -> OpenPositionKey {
        OpenPositionKey::new(self.instrument.clone(), self.direction)
    }
}

/// Point-in-time market view of one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub instrument: Instrument,
    pub price: Decimal,
    /// Open interest in quote currency; `None` when the venue does not report it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_interest_notional: Option<Decimal>,
}

/// One candlestick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: i64,
    pub close_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}
