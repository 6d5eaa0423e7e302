//! Domain types for the agent trading ledger.
//!
//! This module provides:
//! - Lossless numeric handling via Decimal wrapper
//! - Domain primitives: TimeMs, AgentId, Instrument, Direction, ActionKind
//! - Trade actions, derived closed-trade fields, and decision records
//! - Oracle candidate decisions and exchange/market views

pub mod action;
pub mod decimal;
pub mod decision;
pub mod market;
pub mod primitives;
pub mod record;

pub use action::{
    ClosedTrade, OpenPosition, OpenPositionKey, OpenPositionSnapshot, RawTradeAction, TradeAction,
    TradeEvent,
};
pub use decimal::Decimal;
pub use decision::{CandidateDecision, RequestedAction};
pub use market::{AccountState, ExchangePosition, Kline, MarketSnapshot};
pub use primitives::{ActionKind, AgentId, Direction, Instrument, InvalidActionKind, TimeMs};
pub use record::DecisionRecord;
