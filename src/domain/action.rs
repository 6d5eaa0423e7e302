//! Trade actions, derived closed-trade fields, and open-position state.

use crate::domain::{ActionKind, AgentId, Decimal, Direction, Instrument, InvalidActionKind, TimeMs};
use serde::{Deserialize, Serialize};

/// One accepted execution, as filled by the exchange.
///
/// Created once after a successful fill and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeAction {
    pub instrument: Instrument,
    pub kind: ActionKind,
    /// Actual fill price.
    pub price: Decimal,
    /// Actual fill quantity (base units).
    pub quantity: Decimal,
    pub leverage: u32,
    pub time_ms: TimeMs,
    pub cycle_number: u64,
    /// Oracle's stated confidence, 0-100.
    pub confidence: u32,
}

impl TradeAction {
    pub fn key(&self) -> OpenPositionKey {
        OpenPositionKey::new(self.instrument.clone(), self.kind.direction())
    }

    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }

    /// Deterministic storage key for this action within an agent's log.
    ///
    /// `seq` is the action's position inside its cycle, so two identical
    /// fills in one cycle still get distinct keys.
    pub fn action_key(&self, agent: &AgentId, seq: usize) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(agent.as_str());
        hasher.update(self.cycle_number.to_le_bytes());
        hasher.update((seq as u64).to_le_bytes());
        hasher.update(self.instrument.as_str());
        hasher.update(self.kind.as_str());
        hasher.update(self.price.to_canonical_string());
        hasher.update(self.quantity.to_canonical_string());
        hasher.update(self.time_ms.as_ms().to_le_bytes());
        let hash = hasher.finalize();
        format!("hash:{}", hex::encode(&hash[..16]))
    }
}

/// A trade action as read back from storage or another untyped source,
/// before its kind has been checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTradeAction {
    pub instrument: String,
    pub kind: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub leverage: u32,
    pub time_ms: TimeMs,
    pub cycle_number: u64,
    pub confidence: u32,
}

impl TryFrom<RawTradeAction> for TradeAction {
    type Error = InvalidActionKind;

    fn try_from(raw: RawTradeAction) -> Result<Self, Self::Error> {
        Ok(TradeAction {
            instrument: Instrument::new(raw.instrument),
            kind: raw.kind.parse()?,
            price: raw.price,
            quantity: raw.quantity,
            leverage: raw.leverage,
            time_ms: raw.time_ms,
            cycle_number: raw.cycle_number,
            confidence: raw.confidence,
        })
    }
}

impl From<&TradeAction> for RawTradeAction {
    fn from(action: &TradeAction) -> Self {
        RawTradeAction {
            instrument: action.instrument.as_str().to_string(),
            kind: action.kind.as_str().to_string(),
            price: action.price,
            quantity: action.quantity,
            leverage: action.leverage,
            time_ms: action.time_ms,
            cycle_number: action.cycle_number,
            confidence: action.confidence,
        }
    }
}

/// Realized outcome attached to a close action that matched an open position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub entry_price: Decimal,
    pub entry_time_ms: TimeMs,
    /// Quantity the PnL was computed on (the open position's quantity).
    pub quantity: Decimal,
    pub leverage: u32,
    pub margin_used: Decimal,
    pub pnl: Decimal,
    pub pnl_pct: Decimal,
    pub duration_secs: i64,
}

/// A recorded trade action plus, for matched closes, its realized outcome.
///
/// `closed` is absent (not zeroed) for opens and orphaned closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeEvent {
    #[serde(flatten)]
    pub action: TradeAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed: Option<ClosedTrade>,
}

impl TradeEvent {
    pub fn is_orphaned_close(&self) -> bool {
        self.action.kind.is_close() && self.closed.is_none()
    }
}

/// Composite key of an open position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OpenPositionKey {
    pub instrument: Instrument,
    pub direction: Direction,
}

impl OpenPositionKey {
    pub fn new(instrument: Instrument, direction: Direction) -> Self {
        Self {
            instrument,
            direction,
        }
    }
}

impl std::fmt::Display for OpenPositionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.instrument, self.direction)
    }
}

/// Working state of one open position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPositionSnapshot {
    pub entry_price: Decimal,
    pub quantity: Decimal,
    /// Always >= 1.
    pub leverage: u32,
    pub opened_at: TimeMs,
}

impl OpenPositionSnapshot {
    /// Capital committed: quantity * entry price / leverage.
    pub fn margin_used(&self) -> Decimal {
        self.quantity * self.entry_price / Decimal::from(self.leverage.max(1))
    }
}

/// A keyed open-position entry, used for copy-out query results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub instrument: Instrument,
    pub direction: Direction,
    #[serde(flatten)]
    pub snapshot: OpenPositionSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn open_action() -> TradeAction {
        TradeAction {
            instrument: Instrument::new("BTCUSDT"),
            kind: ActionKind::OpenLong,
            price: d("60000"),
            quantity: d("1"),
            leverage: 10,
            time_ms: TimeMs::new(0),
            cycle_number: 1,
            confidence: 80,
        }
    }

    #[test]
    fn test_margin_used_floors_leverage_at_one() {
        let snapshot = OpenPositionSnapshot {
            entry_price: d("100"),
            quantity: d("2"),
            leverage: 0,
            opened_at: TimeMs::new(0),
        };
        assert_eq!(snapshot.margin_used(), d("200"));
    }

    #[test]
    fn test_orphaned_close_omits_closed_fields() {
        let mut action = open_action();
        action.kind = ActionKind::CloseLong;
        let event = TradeEvent {
            action,
            closed: None,
        };
        assert!(event.is_orphaned_close());

        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("closed").is_none());
        assert_eq!(json["kind"], "close_long");

        let back: TradeEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_action_key_depends_on_seq_and_agent() {
        let action = open_action();
        let alpha = AgentId::new("alpha");
        let key = action.action_key(&alpha, 0);
        assert!(key.starts_with("hash:"));
        assert_eq!(key, action.action_key(&alpha, 0));
        assert_ne!(key, action.action_key(&alpha, 1));
        assert_ne!(key, action.action_key(&AgentId::new("beta"), 0));
    }

    #[test]
    fn test_raw_action_with_unknown_kind_is_rejected() {
        let mut raw = RawTradeAction::from(&open_action());
        assert_eq!(TradeAction::try_from(raw.clone()), Ok(open_action()));

        raw.kind = "hold".to_string();
        assert_eq!(
            TradeAction::try_from(raw),
            Err(InvalidActionKind("hold".to_string()))
        );
    }

    #[test]
    fn test_key_display() {
        assert_eq!(open_action().key().to_string(), "BTCUSDT_long");
    }
}
