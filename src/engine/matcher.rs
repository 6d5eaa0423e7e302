use crate::domain::{
    ClosedTrade, Decimal, Direction, OpenPosition, OpenPositionKey, OpenPositionSnapshot,
    TradeAction, TradeEvent,
};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Why an action was not turned into a trade event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchSkip {
    /// An open with quantity <= 0 cannot be closed later and would corrupt matching.
    NonPositiveOpenQuantity,
}

impl std::fmt::Display for MatchSkip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchSkip::NonPositiveOpenQuantity => write!(f, "open with non-positive quantity"),
        }
    }
}

/// Realized PnL of closing `quantity` opened at `entry` and closed at `exit`.
pub fn realized_pnl(direction: Direction, quantity: Decimal, entry: Decimal, exit: Decimal) -> Decimal {
    match direction {
        Direction::Long => quantity * (exit - entry),
        Direction::Short => quantity * (entry - exit),
    }
}

/// Pairs opening actions with later closing actions per (instrument, direction).
///
/// Actions must be fed in chronological order. At most one snapshot exists per
/// key; a close always clears its slot (partial closes are not modeled).
#[derive(Debug, Clone, Default)]
pub struct TradeMatcher {
    open: BTreeMap<OpenPositionKey, OpenPositionSnapshot>,
}

impl TradeMatcher {
    pub fn new() -> Self {
        Self {
            open: BTreeMap::new(),
        }
    }

    /// Process one executed action, updating open-position state.
    pub fn process_action(&mut self, action: TradeAction) -> Result<TradeEvent, MatchSkip> {
        if action.kind.is_open() {
            self.handle_open(action)
        } else {
            Ok(self.handle_close(action))
        }
    }

    fn handle_open(&mut self, action: TradeAction) -> Result<TradeEvent, MatchSkip> {
        if !action.quantity.is_positive() {
            return Err(MatchSkip::NonPositiveOpenQuantity);
        }

        let key = action.key();
        let snapshot = OpenPositionSnapshot {
            entry_price: action.price,
            quantity: action.quantity,
            leverage: action.leverage.max(1),
            opened_at: action.time_ms,
        };
        if let Some(stale) = self.open.insert(key.clone(), snapshot) {
            warn!(
                key = %key,
                stale_qty = %stale.quantity,
                stale_px = %stale.entry_price,
                "Overwriting stale open position snapshot"
            );
        }

        Ok(TradeEvent {
            action,
            closed: None,
        })
    }

    fn handle_close(&mut self, mut action: TradeAction) -> TradeEvent {
        let key = action.key();
        let Some(open) = self.open.remove(&key) else {
            debug!(key = %key, cycle = action.cycle_number, "Orphaned close, no matching open");
            return TradeEvent {
                action,
                closed: None,
            };
        };

        if !action.quantity.is_positive() {
            action.quantity = open.quantity;
        }

        let margin_used = open.margin_used();
        let pnl = realized_pnl(key.direction, open.quantity, open.entry_price, action.price);
        let pnl_pct = pnl
            .checked_div(margin_used)
            .map(|ratio| ratio * Decimal::hundred())
            .unwrap_or_else(Decimal::zero);

        let closed = ClosedTrade {
            entry_price: open.entry_price,
            entry_time_ms: open.opened_at,
            quantity: open.quantity,
            leverage: open.leverage,
            margin_used,
            pnl,
            pnl_pct,
            duration_secs: action.time_ms.seconds_since(open.opened_at),
        };

        TradeEvent {
            action,
            closed: Some(closed),
        }
    }

    pub fn get(&self, key: &OpenPositionKey) -> Option<&OpenPositionSnapshot> {
        self.open.get(key)
    }

    pub fn contains(&self, key: &OpenPositionKey) -> bool {
        self.open.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// Independent copy of current open positions, ordered by key.
    pub fn open_positions(&self) -> Vec<OpenPosition> {
        self.open
            .iter()
            .map(|(key, snapshot)| OpenPosition {
                instrument: key.instrument.clone(),
                direction: key.direction,
                snapshot: snapshot.clone(),
            })
            .collect()
    }
}

/// Replay a chronological action log from scratch.
///
/// Skipped actions are dropped; the result is a pure function of the input.
pub fn replay<I>(actions: I) -> (Vec<TradeEvent>, TradeMatcher)
where
    I: IntoIterator<Item = TradeAction>,
{
    let mut matcher = TradeMatcher::new();
    let events = actions
        .into_iter()
        .filter_map(|action| matcher.process_action(action).ok())
        .collect();
    (events, matcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActionKind, Instrument, TimeMs};

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn action(kind: ActionKind, px: &str, qty: &str, lev: u32, time_ms: i64) -> TradeAction {
        TradeAction {
            instrument: Instrument::new("BTCUSDT"),
            kind,
            price: d(px),
            quantity: d(qty),
            leverage: lev,
            time_ms: TimeMs::new(time_ms),
            cycle_number: 1,
            confidence: 70,
        }
    }

    #[test]
    fn test_zero_quantity_open_is_skipped() {
        let mut matcher = TradeMatcher::new();
        let result = matcher.process_action(action(ActionKind::OpenLong, "100", "0", 5, 0));
        assert_eq!(result, Err(MatchSkip::NonPositiveOpenQuantity));
        assert!(matcher.is_empty());
    }

    #[test]
    fn test_close_without_quantity_uses_open_quantity() {
        let mut matcher = TradeMatcher::new();
        matcher
            .process_action(action(ActionKind::OpenShort, "200", "3", 2, 0))
            .unwrap();
        let event = matcher
            .process_action(action(ActionKind::CloseShort, "180", "0", 0, 60_000))
            .unwrap();

        assert_eq!(event.action.quantity, d("3"));
        let closed = event.closed.unwrap();
        // 3 * (200 - 180)
        assert_eq!(closed.pnl, d("60"));
        // margin = 3 * 200 / 2 = 300
        assert_eq!(closed.margin_used, d("300"));
        assert_eq!(closed.pnl_pct, d("20"));
        assert_eq!(closed.duration_secs, 60);
        assert!(matcher.is_empty());
    }

    #[test]
    fn test_partial_close_clears_slot() {
        let mut matcher = TradeMatcher::new();
        matcher
            .process_action(action(ActionKind::OpenLong, "100", "4", 1, 0))
            .unwrap();
        let event = matcher
            .process_action(action(ActionKind::CloseLong, "110", "1", 1, 1000))
            .unwrap();

        // PnL is computed on the open quantity, and the slot is cleared.
        assert_eq!(event.closed.unwrap().pnl, d("40"));
        assert!(matcher.is_empty());
    }

    #[test]
    fn test_long_and_short_tracked_independently() {
        let mut matcher = TradeMatcher::new();
        matcher
            .process_action(action(ActionKind::OpenLong, "100", "1", 1, 0))
            .unwrap();
        matcher
            .process_action(action(ActionKind::OpenShort, "101", "1", 1, 0))
            .unwrap();
        assert_eq!(matcher.len(), 2);

        let event = matcher
            .process_action(action(ActionKind::CloseShort, "99", "1", 1, 10))
            .unwrap();
        assert_eq!(event.closed.unwrap().pnl, d("2"));
        assert_eq!(matcher.len(), 1);
        assert!(matcher.contains(&OpenPositionKey::new(
            Instrument::new("BTCUSDT"),
            Direction::Long
        )));
    }

    #[test]
    fn test_second_open_overwrites_stale_snapshot() {
        let mut matcher = TradeMatcher::new();
        matcher
            .process_action(action(ActionKind::OpenLong, "100", "1", 1, 0))
            .unwrap();
        matcher
            .process_action(action(ActionKind::OpenLong, "120", "2", 3, 5))
            .unwrap();

        let positions = matcher.open_positions();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].snapshot.entry_price, d("120"));
        assert_eq!(positions[0].snapshot.quantity, d("2"));
    }

    #[test]
    fn test_replay_is_deterministic() {
        let log = vec![
            action(ActionKind::OpenLong, "100", "1", 2, 0),
            action(ActionKind::CloseLong, "90", "1", 2, 1000),
            action(ActionKind::CloseShort, "90", "1", 2, 2000),
        ];
        let (first, _) = replay(log.clone());
        let (second, _) = replay(log);
        assert_eq!(first, second);
        assert_eq!(first[1].closed.as_ref().unwrap().pnl, d("-10"));
        assert_eq!(first[1].closed.as_ref().unwrap().pnl_pct, d("-20"));
        assert!(first[2].is_orphaned_close());
    }
}
