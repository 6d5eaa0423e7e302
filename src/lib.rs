pub mod agent;
pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod ledger;
pub mod market;
pub mod oracle;

pub use agent::{AgentHandle, AgentScheduler, DecisionCycle};
pub use config::{AgentSpec, Config, RiskConfig};
pub use db::{init_db, Repository};
pub use domain::{
    ActionKind, AgentId, CandidateDecision, Decimal, DecisionRecord, Direction, Instrument,
    RequestedAction, TimeMs, TradeAction, TradeEvent,
};
pub use error::AppError;
pub use exchange::{Exchange, PaperExchange};
pub use ledger::{PositionLedger, TradeQuery};
pub use market::{BinanceMarketData, CachedMarketData, MarketData, MockMarketData};
pub use oracle::{HttpOracle, MockOracle, Oracle};
