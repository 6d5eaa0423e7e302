//! Candidate decisions requested by the oracle.

use crate::domain::{ActionKind, Decimal, Instrument, OpenPositionKey};
use serde::{Deserialize, Serialize};

/// One action the oracle asks for. Nothing here has been validated yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedAction {
    pub instrument: Instrument,
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_hint: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Decimal>,
    /// Alternative sizing in quote currency, resolved against the mark price.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notional_usd: Option<Decimal>,
    pub leverage: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<Decimal>,
    pub confidence: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl RequestedAction {
    /// Minimal request; sizing and protection fields unset.
    pub fn new(instrument: Instrument, kind: ActionKind) -> Self {
        Self {
            instrument,
            kind,
            price_hint: None,
            quantity: None,
            notional_usd: None,
            leverage: 1,
            stop_loss: None,
            take_profit: None,
            confidence: 0,
            reasoning: None,
        }
    }

    pub fn key(&self) -> OpenPositionKey {
        OpenPositionKey::new(self.instrument.clone(), self.kind.direction())
    }

    /// Resolved quantity: explicit quantity first, otherwise notional / price.
    pub fn resolved_quantity(&self) -> Option<Decimal> {
        match (self.quantity, self.notional_usd, self.price_hint) {
            (Some(q), _, _) => Some(q),
            (None, Some(notional), Some(price)) => notional.checked_div(price),
            _ => None,
        }
    }
}

/// Oracle output: zero or more requested actions plus free-text rationale.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CandidateDecision {
    pub actions: Vec<RequestedAction>,
    pub rationale: String,
}

impl CandidateDecision {
    /// "No action this cycle", keeping whatever rationale was readable.
    pub fn no_action(rationale: impl Into<String>) -> Self {
        Self {
            actions: Vec::new(),
            rationale: rationale.into(),
        }
    }
}
