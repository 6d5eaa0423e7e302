//! Reasoning oracle boundary: what a cycle sends out and how the answer is read.

use crate::domain::{
    AccountState, AgentId, CandidateDecision, DecisionRecord, MarketSnapshot, OpenPosition,
    TimeMs,
};
use crate::engine::PerformanceSnapshot;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub mod http;
pub mod mock;
pub mod parse;

pub use http::HttpOracle;
pub use mock::MockOracle;
pub use parse::parse_candidate;

/// Everything the oracle sees for one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionContext {
    pub agent_id: AgentId,
    pub cycle_number: u64,
    pub time_ms: TimeMs,
    pub account: AccountState,
    pub open_positions: Vec<OpenPosition>,
    pub markets: Vec<MarketSnapshot>,
    pub performance: PerformanceSnapshot,
    /// Latest decision records, oldest first.
    pub recent_records: Vec<DecisionRecord>,
}

#[async_trait]
pub trait Oracle: Send + Sync + fmt::Debug {
    /// Ask for a decision. Unreadable answers come back as "no action", not
    /// as an error; errors are reserved for failing to get an answer at all.
    async fn request_decision(
        &self,
        context: &DecisionContext,
    ) -> Result<CandidateDecision, OracleError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    #[error("Oracle transport error: {0}")]
    Transport(String),
    #[error("Oracle HTTP error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Oracle configuration error: {0}")]
    Config(String),
}
