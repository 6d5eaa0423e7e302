//! Pure computation engine(s) for deterministic ledger logic.
//!
//! Nothing in here performs I/O or holds locks; the ledger and the decision
//! cycle own state and call into these functions.

pub mod matcher;
pub mod performance;
pub mod risk;

pub use matcher::{realized_pnl, replay, MatchSkip, TradeMatcher};
pub use performance::{summarize, InstrumentPerformance, PerformanceSnapshot, ProfitFactor};
pub use risk::{Adjustment, Rejection, RiskRule, RiskValidator, Verdict};
