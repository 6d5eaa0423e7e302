//! Rolling statistics over realized trades.

use crate::domain::{Decimal, Instrument, TradeEvent};
use serde::Serialize;
use std::collections::BTreeMap;

/// Gross profit over gross loss, with explicit sentinels where the ratio is undefined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ProfitFactor {
    Ratio(Decimal),
    /// At least one winning trade and no losing trades.
    NoLosses,
    /// Nothing to measure: no trades, or only breakeven ones.
    NoTrades,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentPerformance {
    pub instrument: Instrument,
    pub trades: usize,
    pub wins: usize,
    pub total_pnl: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSnapshot {
    pub trade_count: usize,
    pub wins: usize,
    pub losses: usize,
    /// Fraction in [0, 1].
    pub win_rate: Decimal,
    pub total_pnl: Decimal,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    pub profit_factor: ProfitFactor,
    /// Mean over sample stdev of per-trade PnL% on margin; not annualised.
    pub sharpe_ratio: f64,
    pub avg_holding_secs: i64,
    /// Trailing losing trades counted back from the most recent.
    pub consecutive_losses: usize,
    pub per_instrument: Vec<InstrumentPerformance>,
    pub best_instrument: Option<Instrument>,
    pub worst_instrument: Option<Instrument>,
}

impl PerformanceSnapshot {
    pub fn empty() -> Self {
        summarize(&[], 0)
    }
}

/// Summarize the most recent `window` matched closes among `events`.
///
/// Events are expected oldest first. Opens and orphaned closes are ignored.
/// A `window` of 0 means every matched close.
pub fn summarize(events: &[TradeEvent], window: usize) -> PerformanceSnapshot {
    let closed: Vec<&TradeEvent> = events.iter().filter(|e| e.closed.is_some()).collect();
    let start = if window == 0 {
        0
    } else {
        closed.len().saturating_sub(window)
    };
    let trades = &closed[start..];

    let mut wins = 0usize;
    let mut losses = 0usize;
    let mut gross_profit = Decimal::zero();
    let mut gross_loss = Decimal::zero();
    let mut holding_secs = 0i64;
    let mut returns = Vec::with_capacity(trades.len());
    let mut by_instrument: BTreeMap<Instrument, InstrumentPerformance> = BTreeMap::new();

    for event in trades {
        let Some(closed) = &event.closed else {
            continue;
        };
        let entry = by_instrument
            .entry(event.action.instrument.clone())
            .or_insert_with(|| InstrumentPerformance {
                instrument: event.action.instrument.clone(),
                trades: 0,
                wins: 0,
                total_pnl: Decimal::zero(),
            });
        entry.trades += 1;
        entry.total_pnl = entry.total_pnl + closed.pnl;

        if closed.pnl.is_positive() {
            wins += 1;
            entry.wins += 1;
            gross_profit = gross_profit + closed.pnl;
        } else if closed.pnl.is_negative() {
            losses += 1;
            gross_loss = gross_loss + closed.pnl.abs();
        }

        holding_secs += closed.duration_secs;
        returns.push(closed.pnl_pct.to_f64());
    }

    let count = trades.len();
    let win_rate = if count == 0 {
        Decimal::zero()
    } else {
        Decimal::from(wins as i64) / Decimal::from(count as i64)
    };

    let profit_factor = if gross_loss.is_positive() {
        ProfitFactor::Ratio(gross_profit / gross_loss)
    } else if gross_profit.is_positive() {
        ProfitFactor::NoLosses
    } else {
        ProfitFactor::NoTrades
    };

    let consecutive_losses = trades
        .iter()
        .rev()
        .take_while(|e| e.closed.as_ref().is_some_and(|c| c.pnl.is_negative()))
        .count();

    let per_instrument: Vec<InstrumentPerformance> = by_instrument.into_values().collect();
    let best_instrument = per_instrument
        .iter()
        .max_by(|a, b| a.total_pnl.cmp(&b.total_pnl))
        .map(|p| p.instrument.clone());
    let worst_instrument = per_instrument
        .iter()
        .min_by(|a, b| a.total_pnl.cmp(&b.total_pnl))
        .map(|p| p.instrument.clone());

    PerformanceSnapshot {
        trade_count: count,
        wins,
        losses,
        win_rate,
        total_pnl: gross_profit - gross_loss,
        gross_profit,
        gross_loss,
        profit_factor,
        sharpe_ratio: sharpe_ratio(&returns),
        avg_holding_secs: if count == 0 { 0 } else { holding_secs / count as i64 },
        consecutive_losses,
        per_instrument,
        best_instrument,
        worst_instrument,
    }
}

/// Mean over sample standard deviation. 0 when undefined, including when
/// every return is the same.
pub fn sharpe_ratio(returns: &[f64]) -> f64 {
    let Some((first, rest)) = returns.split_first() else {
        return 0.0;
    };
    if rest.is_empty() || rest.iter().all(|r| r == first) {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let stdev = variance.sqrt();
    // Rounding in the mean leaves residue on the order of one ulp.
    if !stdev.is_finite() || stdev <= f64::EPSILON * mean.abs().max(1.0) {
        return 0.0;
    }
    mean / stdev
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActionKind, ClosedTrade, TimeMs, TradeAction};

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn close(symbol: &str, pnl: &str, duration_secs: i64) -> TradeEvent {
        let pnl = d(pnl);
        TradeEvent {
            action: TradeAction {
                instrument: Instrument::new(symbol),
                kind: ActionKind::CloseLong,
                price: d("100"),
                quantity: d("1"),
                leverage: 1,
                time_ms: TimeMs::new(0),
                cycle_number: 1,
                confidence: 50,
            },
            closed: Some(ClosedTrade {
                entry_price: d("100"),
                entry_time_ms: TimeMs::new(0),
                quantity: d("1"),
                leverage: 1,
                margin_used: d("1000"),
                pnl,
                pnl_pct: pnl / d("10"),
                duration_secs,
            }),
        }
    }

    #[test]
    fn test_five_trade_scenario() {
        let events = vec![
            close("BTCUSDT", "100", 60),
            close("ETHUSDT", "-50", 120),
            close("BTCUSDT", "200", 60),
            close("SOLUSDT", "-30", 60),
            close("ETHUSDT", "80", 300),
        ];
        let snapshot = summarize(&events, 100);

        assert_eq!(snapshot.trade_count, 5);
        assert_eq!(snapshot.win_rate, d("0.6"));
        assert_eq!(snapshot.profit_factor, ProfitFactor::Ratio(d("4.75")));
        assert_eq!(snapshot.gross_profit, d("380"));
        assert_eq!(snapshot.gross_loss, d("80"));
        assert_eq!(snapshot.total_pnl, d("300"));
        assert_eq!(snapshot.avg_holding_secs, 120);
        assert_eq!(snapshot.consecutive_losses, 0);
        assert_eq!(snapshot.best_instrument, Some(Instrument::new("BTCUSDT")));
        assert_eq!(snapshot.worst_instrument, Some(Instrument::new("SOLUSDT")));
        assert!(snapshot.sharpe_ratio > 0.0);
    }

    #[test]
    fn test_window_keeps_most_recent() {
        let events = vec![close("BTCUSDT", "100", 0), close("BTCUSDT", "-10", 0)];
        let snapshot = summarize(&events, 1);
        assert_eq!(snapshot.trade_count, 1);
        assert_eq!(snapshot.total_pnl, d("-10"));
        assert_eq!(snapshot.consecutive_losses, 1);
    }

    #[test]
    fn test_losing_streak_resets_on_win() {
        let events = vec![
            close("BTCUSDT", "-1", 0),
            close("BTCUSDT", "5", 0),
            close("BTCUSDT", "-2", 0),
            close("BTCUSDT", "-3", 0),
        ];
        assert_eq!(summarize(&events, 0).consecutive_losses, 2);
    }

    #[test]
    fn test_profit_factor_sentinels() {
        assert_eq!(summarize(&[], 10).profit_factor, ProfitFactor::NoTrades);
        let winners = vec![close("BTCUSDT", "10", 0)];
        assert_eq!(summarize(&winners, 10).profit_factor, ProfitFactor::NoLosses);
    }

    #[test]
    fn test_sharpe_degenerate_inputs() {
        assert_eq!(sharpe_ratio(&[]), 0.0);
        assert_eq!(sharpe_ratio(&[5.0]), 0.0);
        assert_eq!(sharpe_ratio(&[2.0, 2.0, 2.0]), 0.0);
        assert_eq!(sharpe_ratio(&[0.1, 0.1, 0.1]), 0.0);
        // One ulp apart is still flat.
        let next_up = f64::from_bits(0.1f64.to_bits() + 1);
        assert_eq!(sharpe_ratio(&[0.1, next_up, 0.1]), 0.0);

        let flat: Vec<TradeEvent> = (0..3).map(|_| close("SOLUSDT", "1", 60)).collect();
        assert_eq!(summarize(&flat, 10).sharpe_ratio, 0.0);

        let one = summarize(&[close("BTCUSDT", "10", 0)], 10);
        assert_eq!(one.sharpe_ratio, 0.0);
        assert!(!one.sharpe_ratio.is_nan());
    }

    #[test]
    fn test_sharpe_uses_sample_stdev() {
        // mean 2, sample variance 4 / 3
        let sharpe = sharpe_ratio(&[1.0, 3.0, 1.0, 3.0]);
        let expected = 2.0 / (4.0f64 / 3.0).sqrt();
        assert!((sharpe - expected).abs() < 1e-12);
    }

    #[test]
    fn test_orphans_and_opens_ignored() {
        let mut orphan = close("BTCUSDT", "0", 0);
        orphan.closed = None;
        let snapshot = summarize(&[orphan], 10);
        assert_eq!(snapshot.trade_count, 0);
        assert_eq!(snapshot.win_rate, Decimal::zero());
    }
}
