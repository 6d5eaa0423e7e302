//! One agent's decision cycle.
//!
//! `Idle -> Gathering -> AwaitingOracle -> Validating -> Executing -> Recording -> Idle`.
//! Every external call is bounded by a timeout. A failure before execution
//! leaves the ledger untouched; once execution starts, whatever the exchange
//! filled is recorded even if a later action fails.

use super::status::{CyclePhase, StatusHandle};
use crate::config::{RiskConfig, Timeouts};
use crate::domain::{
    AccountState, AgentId, CandidateDecision, DecisionRecord, ExchangePosition, Instrument,
    MarketSnapshot, OpenPosition, OpenPositionKey, RequestedAction, TimeMs, TradeAction,
};
use crate::engine::{RiskValidator, Verdict};
use crate::exchange::{Exchange, ExchangeError};
use crate::ledger::{CycleEntry, LedgerError, PositionLedger};
use crate::market::{MarketData, MarketDataError};
use crate::oracle::{DecisionContext, Oracle, OracleError};
use futures::future::try_join_all;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Decision records handed to the oracle as recent history.
const CONTEXT_RECORDS: usize = 10;

#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error(transparent)]
    Market(#[from] MarketDataError),
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Summary of a completed cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_number: u64,
    pub approved: usize,
    pub rejected: usize,
    pub record: DecisionRecord,
}

#[derive(Debug)]
pub struct DecisionCycle {
    agent_id: AgentId,
    universe: Vec<Instrument>,
    ledger: Arc<PositionLedger>,
    oracle: Arc<dyn Oracle>,
    exchange: Arc<dyn Exchange>,
    market: Arc<dyn MarketData>,
    risk: watch::Receiver<Arc<RiskConfig>>,
    timeouts: Timeouts,
    performance_window: usize,
    status: StatusHandle,
}

impl DecisionCycle {
    pub fn new(
        ledger: Arc<PositionLedger>,
        universe: Vec<Instrument>,
        oracle: Arc<dyn Oracle>,
        exchange: Arc<dyn Exchange>,
        market: Arc<dyn MarketData>,
        risk: watch::Receiver<Arc<RiskConfig>>,
    ) -> Self {
        let agent_id = ledger.agent_id().clone();
        Self {
            status: StatusHandle::new(agent_id.clone()),
            agent_id,
            universe,
            ledger,
            oracle,
            exchange,
            market,
            risk,
            timeouts: Timeouts::default(),
            performance_window: 100,
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_performance_window(mut self, window: usize) -> Self {
        self.performance_window = window;
        self
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    pub fn ledger(&self) -> &Arc<PositionLedger> {
        &self.ledger
    }

    pub fn status(&self) -> &StatusHandle {
        &self.status
    }

    /// Run one full cycle. Failures are counted on the status handle and
    /// returned; they never poison later cycles.
    pub async fn run_once(&self, cycle_number: u64) -> Result<CycleReport, CycleError> {
        self.status.begin_cycle(cycle_number);
        let result = self.run_phases(cycle_number).await;
        match &result {
            Ok(report) => {
                info!(
                    agent = %self.agent_id,
                    cycle = cycle_number,
                    approved = report.approved,
                    rejected = report.rejected,
                    executed = report.record.actions.len(),
                    "Cycle complete"
                );
                self.status.record_success(report.record.time_ms);
            }
            Err(e) => {
                warn!(
                    agent = %self.agent_id,
                    cycle = cycle_number,
                    error = %e,
                    "Cycle failed"
                );
                self.status.record_failure(e.to_string());
            }
        }
        result
    }

    async fn run_phases(&self, cycle_number: u64) -> Result<CycleReport, CycleError> {
        let started = TimeMs::now();

        // Gathering
        let risk = self.risk.borrow().clone();
        let account = bounded(
            "account state",
            self.timeouts.exchange,
            self.exchange.account_state(),
        )
        .await?;
        let venue_positions = bounded(
            "exchange positions",
            self.timeouts.exchange,
            self.exchange.positions(),
        )
        .await?;
        let open_positions = self.ledger.open_positions().await;
        let mut notes = self.reconcile(&venue_positions, &open_positions);

        let markets = try_join_all(self.universe.iter().map(|instrument| {
            bounded(
                "market snapshot",
                self.timeouts.market,
                self.market.snapshot(instrument),
            )
        }))
        .await?;
        let performance = self.ledger.performance(self.performance_window).await;
        let recent_records = self.ledger.latest_records(CONTEXT_RECORDS).await;

        // AwaitingOracle
        self.status.set_phase(CyclePhase::AwaitingOracle);
        let context = DecisionContext {
            agent_id: self.agent_id.clone(),
            cycle_number,
            time_ms: started,
            account: account.clone(),
            open_positions: open_positions.clone(),
            markets: markets.clone(),
            performance,
            recent_records,
        };
        let decision = bounded(
            "oracle",
            self.timeouts.oracle,
            self.oracle.request_decision(&context),
        )
        .await?;
        debug!(
            agent = %self.agent_id,
            cycle = cycle_number,
            requested = decision.actions.len(),
            "Oracle answered"
        );

        // Validating
        self.status.set_phase(CyclePhase::Validating);
        let market_map: HashMap<Instrument, MarketSnapshot> = markets
            .into_iter()
            .map(|m| (m.instrument.clone(), m))
            .collect();
        let CandidateDecision { actions, rationale } = decision;
        let (approved, rejected) = self.validate(
            cycle_number,
            &risk,
            actions,
            &account,
            &open_positions,
            &market_map,
            &mut notes,
        );

        // Executing
        self.status.set_phase(CyclePhase::Executing);
        let approved_count = approved.len();
        let mut executed = Vec::with_capacity(approved_count);
        let mut failure = None;
        for action in approved {
            match bounded(
                "order execution",
                self.timeouts.exchange,
                self.exchange.execute(&action),
            )
            .await
            {
                Ok(fill) => executed.push(TradeAction {
                    instrument: action.instrument,
                    kind: action.kind,
                    price: fill.fill_price,
                    quantity: fill.fill_quantity,
                    leverage: action.leverage.max(1),
                    time_ms: fill.time_ms,
                    cycle_number,
                    confidence: action.confidence,
                }),
                Err(e) => {
                    notes.push(format!(
                        "execution stopped at {} {}: {}",
                        action.kind, action.instrument, e
                    ));
                    failure = Some(e);
                    break;
                }
            }
        }

        // Recording
        self.status.set_phase(CyclePhase::Recording);
        let report = self
            .ledger
            .append(CycleEntry {
                cycle_number,
                time_ms: started,
                actions: executed,
                rationale,
                notes,
            })
            .await?;
        for skipped in &report.skipped {
            warn!(
                agent = %self.agent_id,
                cycle = cycle_number,
                index = skipped.index,
                error = %skipped.error,
                "Executed action left out of the ledger"
            );
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(CycleReport {
                cycle_number,
                approved: approved_count,
                rejected,
                record: report.record,
            }),
        }
    }

    /// Compare the venue's open keys with the ledger's. Divergence is
    /// logged and noted, never corrected.
    fn reconcile(&self, venue: &[ExchangePosition], ledger: &[OpenPosition]) -> Vec<String> {
        let venue_keys: BTreeSet<OpenPositionKey> = venue.iter().map(ExchangePosition::key).collect();
        let ledger_keys: BTreeSet<OpenPositionKey> = ledger
            .iter()
            .map(|p| OpenPositionKey::new(p.instrument.clone(), p.direction))
            .collect();

        let mut notes = Vec::new();
        for key in venue_keys.difference(&ledger_keys) {
            warn!(agent = %self.agent_id, key = %key, "Exchange holds a position the ledger does not");
            notes.push(format!("divergence: {} open on exchange only", key));
        }
        for key in ledger_keys.difference(&venue_keys) {
            warn!(agent = %self.agent_id, key = %key, "Ledger holds a position the exchange does not");
            notes.push(format!("divergence: {} open in ledger only", key));
        }
        notes
    }

    /// Split the requested actions into an executable list and rejection
    /// notes. Returns the approved actions and the number rejected.
    #[allow(clippy::too_many_arguments)]
    fn validate(
        &self,
        cycle_number: u64,
        risk: &Arc<RiskConfig>,
        mut actions: Vec<RequestedAction>,
        account: &AccountState,
        open_positions: &[OpenPosition],
        markets: &HashMap<Instrument, MarketSnapshot>,
        notes: &mut Vec<String>,
    ) -> (Vec<RequestedAction>, usize) {
        let mut rejected = 0;

        actions.retain(|action| {
            if self.universe.contains(&action.instrument) {
                return true;
            }
            rejected += 1;
            info!(
                agent = %self.agent_id,
                cycle = cycle_number,
                instrument = %action.instrument,
                "Ignoring requested action outside universe"
            );
            notes.push(format!(
                "ignored {} {}: outside universe",
                action.kind, action.instrument
            ));
            false
        });

        let decision = CandidateDecision {
            actions,
            rationale: String::new(),
        };
        let validator = RiskValidator::new(Arc::clone(risk));
        let verdicts = validator.validate_decision(&decision, account, open_positions, markets);

        let mut open_keys: BTreeSet<OpenPositionKey> = open_positions
            .iter()
            .map(|p| OpenPositionKey::new(p.instrument.clone(), p.direction))
            .collect();
        let mut approved = Vec::new();
        for verdict in verdicts {
            match verdict {
                Verdict::Approved {
                    action,
                    adjustments,
                } => {
                    let key = action.key();
                    if action.kind.is_close() && !open_keys.remove(&key) {
                        rejected += 1;
                        notes.push(format!(
                            "skipped {} {}: no open position",
                            action.kind, action.instrument
                        ));
                        continue;
                    }
                    if action.kind.is_open() {
                        open_keys.insert(key);
                    }
                    for adjustment in adjustments {
                        info!(
                            agent = %self.agent_id,
                            cycle = cycle_number,
                            instrument = %action.instrument,
                            adjustment = %adjustment,
                            "Clamped requested action"
                        );
                        notes.push(format!(
                            "adjusted {} {}: {}",
                            action.kind, action.instrument, adjustment
                        ));
                    }
                    approved.push(action);
                }
                Verdict::Rejected { action, rejection } => {
                    rejected += 1;
                    info!(
                        agent = %self.agent_id,
                        cycle = cycle_number,
                        instrument = %action.instrument,
                        rule = %rejection.rule,
                        observed = %rejection.observed,
                        limit = %rejection.limit,
                        "Rejected requested action"
                    );
                    notes.push(format!(
                        "rejected {} {}: {}",
                        action.kind, action.instrument, rejection
                    ));
                }
            }
        }
        (approved, rejected)
    }
}

/// Await `fut` for at most `limit`.
async fn bounded<T, E>(
    stage: &'static str,
    limit: Duration,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, CycleError>
where
    CycleError: From<E>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(CycleError::from),
        Err(_) => Err(CycleError::Timeout {
            stage,
            after: limit,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActionKind, Decimal};
    use crate::exchange::PaperExchange;
    use crate::market::MockMarketData;
    use crate::oracle::MockOracle;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn btc() -> Instrument {
        Instrument::new("BTCUSDT")
    }

    fn setup(oracle: MockOracle, risk: RiskConfig) -> (DecisionCycle, watch::Sender<Arc<RiskConfig>>) {
        let market: Arc<dyn MarketData> = Arc::new(
            MockMarketData::new()
                .with_price(btc(), d("60000"))
                .with_open_interest(btc(), d("1000000000")),
        );
        let exchange = Arc::new(PaperExchange::new(market.clone(), d("10000"), false));
        let ledger = Arc::new(PositionLedger::new(AgentId::new("a"), vec![btc()]));
        let (tx, rx) = watch::channel(Arc::new(risk));
        let cycle = DecisionCycle::new(ledger, vec![btc()], Arc::new(oracle), exchange, market, rx);
        (cycle, tx)
    }

    fn open_btc(quantity: &str, leverage: u32) -> RequestedAction {
        let mut action = RequestedAction::new(btc(), ActionKind::OpenLong);
        action.quantity = Some(d(quantity));
        action.leverage = leverage;
        action
    }

    #[tokio::test]
    async fn test_records_fill_and_rejection_notes() {
        let decision = CandidateDecision {
            actions: vec![open_btc("1", 10), open_btc("1", 10)],
            rationale: "breakout".to_string(),
        };
        let (cycle, _tx) = setup(MockOracle::new().with_decision(decision), RiskConfig::default());

        let report = cycle.run_once(1).await.unwrap();
        assert_eq!(report.approved, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.record.actions.len(), 1);
        assert_eq!(report.record.actions[0].action.price, d("60000"));
        assert!(report.record.notes[0].contains("anti-stacking"));
        assert_eq!(report.record.rationale, "breakout");
        assert_eq!(cycle.status().snapshot().phase, CyclePhase::Idle);
    }

    #[tokio::test]
    async fn test_risk_config_replacement_applies_next_cycle() {
        let oracle = MockOracle::new().with_decision(CandidateDecision {
            actions: vec![open_btc("1", 10)],
            rationale: String::new(),
        });
        let (cycle, tx) = setup(oracle, RiskConfig::default());
        tx.send_replace(Arc::new(RiskConfig {
            max_leverage_major: 5,
            ..RiskConfig::default()
        }));

        let report = cycle.run_once(1).await.unwrap();
        assert!(report.record.actions.is_empty());
        assert!(report.record.notes[0].contains("leverage"));
    }
}
