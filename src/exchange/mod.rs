//! Exchange abstraction: order execution and the venue's view of the account.

use crate::domain::{
    AccountState, Decimal, ExchangePosition, OpenPositionKey, RequestedAction, TimeMs,
};
use crate::market::MarketDataError;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

pub mod paper;

pub use paper::PaperExchange;

/// What the venue actually filled. The ledger records these values, never
/// the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub order_id: String,
    pub fill_price: Decimal,
    pub fill_quantity: Decimal,
    pub time_ms: TimeMs,
}

/// One account on one venue.
#[async_trait]
pub trait Exchange: Send + Sync + fmt::Debug {
    /// Execute an approved action.
    async fn execute(&self, action: &RequestedAction) -> Result<ExecutionResult, ExchangeError>;

    async fn account_state(&self) -> Result<AccountState, ExchangeError>;

    /// Open positions as the venue sees them.
    async fn positions(&self) -> Result<Vec<ExchangePosition>, ExchangeError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    #[error("Order rejected: {0}")]
    Rejected(String),
    #[error("Invalid order: {0}")]
    InvalidOrder(String),
    #[error("No open position for {0}")]
    NoPosition(OpenPositionKey),
    #[error("Exchange network error: {0}")]
    Network(String),
    #[error(transparent)]
    Market(#[from] MarketDataError),
}
