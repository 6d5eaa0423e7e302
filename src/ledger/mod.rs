//! Per-agent append-only ledger of decision records and trade actions.
//!
//! The ledger owns the open-position map. Writers are serialized behind a
//! tokio `Mutex` and build the next state off to the side; the `RwLock`
//! guarding live state is only held for the final swap, so readers never
//! wait on persistence and never see a half-applied cycle. When a
//! [`Repository`] is attached, a cycle is persisted before it becomes
//! visible in memory.

use crate::db::Repository;
use crate::domain::{
    AgentId, DecisionRecord, Instrument, OpenPosition, RawTradeAction, TimeMs, TradeAction,
    TradeEvent,
};
use crate::engine::{summarize, MatchSkip, PerformanceSnapshot, TradeMatcher};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid action kind: {0}")]
    InvalidActionKind(String),
    #[error("instrument {0} is outside the tracked universe")]
    OutsideUniverse(Instrument),
    #[error("open with non-positive quantity")]
    NonPositiveOpenQuantity,
    #[error("cycle {cycle} is not after last recorded cycle {last}")]
    StaleCycle { cycle: u64, last: u64 },
    #[error("persistence failed: {0}")]
    Persistence(#[from] sqlx::Error),
}

impl From<MatchSkip> for LedgerError {
    fn from(skip: MatchSkip) -> Self {
        match skip {
            MatchSkip::NonPositiveOpenQuantity => LedgerError::NonPositiveOpenQuantity,
        }
    }
}

/// An action left out of a cycle's record, with its position in the batch.
#[derive(Debug)]
pub struct SkippedAction {
    pub index: usize,
    pub error: LedgerError,
}

/// Outcome of one `append`: the record as stored plus what was left out.
#[derive(Debug)]
pub struct AppendReport {
    pub record: DecisionRecord,
    pub skipped: Vec<SkippedAction>,
}

/// Everything one cycle hands to the ledger.
#[derive(Debug, Clone)]
pub struct CycleEntry {
    pub cycle_number: u64,
    pub time_ms: TimeMs,
    pub actions: Vec<TradeAction>,
    pub rationale: String,
    pub notes: Vec<String>,
}

/// Query-time projection over recorded trade events.
#[derive(Debug, Clone, Default)]
pub struct TradeQuery {
    pub instrument: Option<Instrument>,
    /// Inclusive lower bound on action time.
    pub from: Option<TimeMs>,
    /// Inclusive upper bound on action time.
    pub to: Option<TimeMs>,
    /// Only scan the newest N decision records.
    pub lookback_records: Option<usize>,
    /// Keep only the newest N matching events.
    pub limit: Option<usize>,
}

impl TradeQuery {
    fn matches(&self, event: &TradeEvent) -> bool {
        if let Some(instrument) = &self.instrument {
            if &event.action.instrument != instrument {
                return false;
            }
        }
        if let Some(from) = self.from {
            if event.action.time_ms < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if event.action.time_ms > to {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    records: Vec<DecisionRecord>,
    matcher: TradeMatcher,
    last_cycle: Option<u64>,
}

#[derive(Debug)]
pub struct PositionLedger {
    agent_id: AgentId,
    /// `None` tracks every instrument.
    universe: Option<HashSet<Instrument>>,
    repo: Option<Arc<Repository>>,
    state: RwLock<LedgerState>,
    writer: Mutex<()>,
}

impl PositionLedger {
    /// In-memory ledger. An empty `universe` tracks every instrument.
    pub fn new(agent_id: AgentId, universe: impl IntoIterator<Item = Instrument>) -> Self {
        let universe: HashSet<Instrument> = universe.into_iter().collect();
        Self {
            agent_id,
            universe: if universe.is_empty() {
                None
            } else {
                Some(universe)
            },
            repo: None,
            state: RwLock::new(LedgerState::default()),
            writer: Mutex::new(()),
        }
    }

    /// Ledger with write-through persistence, rebuilt from what the
    /// repository already holds for this agent.
    ///
    /// # Errors
    /// Returns an error if the stored records cannot be loaded.
    pub async fn restore(
        agent_id: AgentId,
        universe: impl IntoIterator<Item = Instrument>,
        repo: Arc<Repository>,
    ) -> Result<Self, LedgerError> {
        let mut ledger = Self::new(agent_id, universe);
        let stored = repo.load_records(&ledger.agent_id).await?;

        let mut state = LedgerState::default();
        let mut dropped = 0usize;
        for stored_record in stored {
            let mut events = Vec::with_capacity(stored_record.actions.len());
            for raw in stored_record.actions {
                let action = match TradeAction::try_from(raw) {
                    Ok(action) => action,
                    Err(e) => {
                        dropped += 1;
                        warn!(
                            agent = %ledger.agent_id,
                            cycle = stored_record.cycle_number,
                            error = %e,
                            "Dropping stored action"
                        );
                        continue;
                    }
                };
                match state.matcher.process_action(action) {
                    Ok(event) => events.push(event),
                    Err(skip) => {
                        dropped += 1;
                        warn!(
                            agent = %ledger.agent_id,
                            cycle = stored_record.cycle_number,
                            reason = %skip,
                            "Dropping stored action"
                        );
                    }
                }
            }
            state.last_cycle = Some(stored_record.cycle_number);
            state.records.push(DecisionRecord {
                agent_id: stored_record.agent_id,
                cycle_number: stored_record.cycle_number,
                time_ms: stored_record.time_ms,
                actions: events,
                rationale: stored_record.rationale,
                notes: stored_record.notes,
            });
        }

        info!(
            agent = %ledger.agent_id,
            records = state.records.len(),
            open_positions = state.matcher.len(),
            dropped,
            "Ledger restored"
        );
        ledger.state = RwLock::new(state);
        ledger.repo = Some(repo);
        Ok(ledger)
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    pub fn tracks(&self, instrument: &Instrument) -> bool {
        self.universe
            .as_ref()
            .map_or(true, |universe| universe.contains(instrument))
    }

    /// Append one cycle's executed actions as a single DecisionRecord.
    ///
    /// Actions outside the universe and opens with non-positive quantity are
    /// skipped and reported, never failing the batch. Either the whole
    /// record becomes visible or, on error, nothing changes.
    ///
    /// # Errors
    /// `StaleCycle` if the cycle number does not increase, `Persistence` if
    /// the write-through fails.
    pub async fn append(&self, entry: CycleEntry) -> Result<AppendReport, LedgerError> {
        let indexed = entry.actions.into_iter().enumerate().collect();
        self.append_indexed(
            entry.cycle_number,
            entry.time_ms,
            indexed,
            entry.rationale,
            entry.notes,
            Vec::new(),
        )
        .await
    }

    /// Like [`append`](Self::append), for actions whose kind has not been
    /// checked yet. Unknown kinds are skipped as `InvalidActionKind`.
    ///
    /// # Errors
    /// Same as `append`.
    pub async fn append_raw(
        &self,
        cycle_number: u64,
        time_ms: TimeMs,
        actions: Vec<RawTradeAction>,
        rationale: String,
        notes: Vec<String>,
    ) -> Result<AppendReport, LedgerError> {
        let mut skipped = Vec::new();
        let mut typed = Vec::with_capacity(actions.len());
        for (index, raw) in actions.into_iter().enumerate() {
            match TradeAction::try_from(raw) {
                Ok(action) => typed.push((index, action)),
                Err(e) => skipped.push(SkippedAction {
                    index,
                    error: LedgerError::InvalidActionKind(e.0),
                }),
            }
        }
        self.append_indexed(cycle_number, time_ms, typed, rationale, notes, skipped)
            .await
    }

    async fn append_indexed(
        &self,
        cycle_number: u64,
        time_ms: TimeMs,
        actions: Vec<(usize, TradeAction)>,
        rationale: String,
        notes: Vec<String>,
        mut skipped: Vec<SkippedAction>,
    ) -> Result<AppendReport, LedgerError> {
        let _writer = self.writer.lock().await;

        // Work on a copy so a failed write leaves the live map untouched.
        let mut matcher = {
            let state = self.state.read().await;
            if let Some(last) = state.last_cycle {
                if cycle_number <= last {
                    return Err(LedgerError::StaleCycle {
                        cycle: cycle_number,
                        last,
                    });
                }
            }
            state.matcher.clone()
        };
        let mut events = Vec::with_capacity(actions.len());
        for (index, mut action) in actions {
            if !self.tracks(&action.instrument) {
                info!(
                    agent = %self.agent_id,
                    cycle = cycle_number,
                    instrument = %action.instrument,
                    "Ignoring action outside tracked universe"
                );
                skipped.push(SkippedAction {
                    index,
                    error: LedgerError::OutsideUniverse(action.instrument),
                });
                continue;
            }
            action.cycle_number = cycle_number;
            match matcher.process_action(action) {
                Ok(event) => events.push(event),
                Err(skip) => {
                    warn!(
                        agent = %self.agent_id,
                        cycle = cycle_number,
                        index,
                        reason = %skip,
                        "Skipping malformed action"
                    );
                    skipped.push(SkippedAction {
                        index,
                        error: skip.into(),
                    });
                }
            }
        }
        skipped.sort_by_key(|s| s.index);

        let record = DecisionRecord {
            agent_id: self.agent_id.clone(),
            cycle_number,
            time_ms,
            actions: events,
            rationale,
            notes,
        };

        if let Some(repo) = &self.repo {
            repo.insert_cycle(&record).await?;
        }

        let mut state = self.state.write().await;
        state.matcher = matcher;
        state.last_cycle = Some(cycle_number);
        state.records.push(record.clone());

        Ok(AppendReport { record, skipped })
    }

    /// The newest `n` decision records, oldest first.
    pub async fn latest_records(&self, n: usize) -> Vec<DecisionRecord> {
        let state = self.state.read().await;
        let start = state.records.len().saturating_sub(n);
        state.records[start..].to_vec()
    }

    /// Copy of the current open positions, ordered by (instrument, direction).
    pub async fn open_positions(&self) -> Vec<OpenPosition> {
        self.state.read().await.matcher.open_positions()
    }

    pub async fn last_cycle(&self) -> Option<u64> {
        self.state.read().await.last_cycle
    }

    pub async fn record_count(&self) -> usize {
        self.state.read().await.records.len()
    }

    /// Trade events matching `query`, oldest first.
    pub async fn trade_events(&self, query: &TradeQuery) -> Vec<TradeEvent> {
        let state = self.state.read().await;
        let start = query
            .lookback_records
            .map_or(0, |n| state.records.len().saturating_sub(n));

        let mut events: Vec<TradeEvent> = state.records[start..]
            .iter()
            .flat_map(|record| record.actions.iter())
            .filter(|event| query.matches(event))
            .cloned()
            .collect();
        drop(state);

        if let Some(limit) = query.limit {
            let excess = events.len().saturating_sub(limit);
            events.drain(..excess);
        }
        events
    }

    /// The newest `window` matched closes, oldest first. 0 returns all of them.
    pub async fn closed_trades(&self, window: usize) -> Vec<TradeEvent> {
        let state = self.state.read().await;
        let mut closed: Vec<TradeEvent> = state
            .records
            .iter()
            .rev()
            .flat_map(|record| record.actions.iter().rev())
            .filter(|event| event.closed.is_some())
            .take(if window == 0 { usize::MAX } else { window })
            .cloned()
            .collect();
        closed.reverse();
        closed
    }

    pub async fn performance(&self, window: usize) -> PerformanceSnapshot {
        summarize(&self.closed_trades(window).await, window)
    }
}
