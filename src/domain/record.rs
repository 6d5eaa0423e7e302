//! Per-cycle audit record.

use crate::domain::{AgentId, TimeMs, TradeEvent};
use serde::{Deserialize, Serialize};

/// One decision-cycle iteration: what the oracle said, what was rejected,
/// and what was actually executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub agent_id: AgentId,
    pub cycle_number: u64,
    pub time_ms: TimeMs,
    /// Executed actions in execution order, closes carrying realized PnL.
    pub actions: Vec<TradeEvent>,
    pub rationale: String,
    /// Validation and execution notes (rejections with rule and numbers,
    /// exchange errors).
    pub notes: Vec<String>,
}
