//! One long-lived tokio task per agent, each on its own fixed interval.

use super::cycle::DecisionCycle;
use super::status::StatusHandle;
use crate::config::{AgentSpec, AgentStartupError, Config, OracleSpec, RiskConfig};
use crate::db::Repository;
use crate::domain::{AgentId, Decimal};
use crate::exchange::PaperExchange;
use crate::ledger::PositionLedger;
use crate::market::MarketData;
use crate::oracle::{HttpOracle, MockOracle, Oracle};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

/// Read-side handle on a running agent.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    pub agent_id: AgentId,
    pub ledger: Arc<PositionLedger>,
    pub status: StatusHandle,
}

#[derive(Debug)]
struct ScheduledAgent {
    cycle: Arc<DecisionCycle>,
    period: Duration,
}

#[derive(Debug)]
pub struct AgentScheduler {
    agents: Vec<ScheduledAgent>,
    risk_tx: watch::Sender<Arc<RiskConfig>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl AgentScheduler {
    pub fn new(risk: Arc<RiskConfig>) -> Self {
        let (risk_tx, _) = watch::channel(risk);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            agents: Vec::new(),
            risk_tx,
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    /// Build every agent described by `config`. Agents that fail startup
    /// checks are left out and returned alongside the scheduler.
    pub async fn from_config(
        config: &Config,
        repo: Option<Arc<Repository>>,
        market: Arc<dyn MarketData>,
    ) -> (Self, Vec<AgentStartupError>) {
        let mut scheduler = Self::new(Arc::new(config.risk.clone()));
        let mut failures = Vec::new();

        for spec in &config.agents {
            let built = scheduler
                .build_agent(spec, config, repo.clone(), Arc::clone(&market))
                .await
                .and_then(|(cycle, period)| scheduler.add(cycle, period));
            if let Err(e) = built {
                error!(agent = %spec.id, error = %e, "Agent failed startup checks, not scheduling it");
                failures.push(e);
            }
        }

        info!(
            agents = scheduler.agents.len(),
            refused = failures.len(),
            "Agents built"
        );
        (scheduler, failures)
    }

    async fn build_agent(
        &self,
        spec: &AgentSpec,
        config: &Config,
        repo: Option<Arc<Repository>>,
        market: Arc<dyn MarketData>,
    ) -> Result<(DecisionCycle, Duration), AgentStartupError> {
        spec.validate(&config.risk)?;
        let id = spec.id.trim().to_string();
        if self.agents.iter().any(|a| a.cycle.agent_id().as_str() == id) {
            return Err(AgentStartupError::DuplicateId(id));
        }

        let agent_id = AgentId::new(id.clone());
        let universe = spec.instruments();

        let ledger = match repo {
            Some(repo) => PositionLedger::restore(agent_id, universe.clone(), repo)
                .await
                .map_err(|e| AgentStartupError::Ledger(id.clone(), e.to_string()))?,
            None => PositionLedger::new(agent_id, universe.clone()),
        };
        let ledger = Arc::new(ledger);

        let oracle: Arc<dyn Oracle> = match &spec.oracle {
            OracleSpec::Http {
                url,
                api_key,
                model,
            } => Arc::new(
                HttpOracle::new(url.clone(), api_key.clone(), model.clone(), config.timeouts.oracle)
                    .map_err(|e| AgentStartupError::Oracle(id.clone(), e.to_string()))?,
            ),
            OracleSpec::Mock => Arc::new(MockOracle::new()),
        };

        let realized: Decimal = ledger
            .closed_trades(0)
            .await
            .iter()
            .filter_map(|event| event.closed.as_ref().map(|c| c.pnl))
            .sum();
        let exchange = PaperExchange::new(Arc::clone(&market), spec.initial_equity, spec.restricted)
            .with_history(ledger.open_positions().await, realized);

        let cycle = DecisionCycle::new(
            ledger,
            universe,
            oracle,
            Arc::new(exchange),
            market,
            self.risk_tx.subscribe(),
        )
        .with_timeouts(config.timeouts)
        .with_performance_window(config.performance_window);

        let period = spec
            .interval_secs
            .map(Duration::from_secs)
            .unwrap_or(config.cycle_interval);
        Ok((cycle, period))
    }

    /// Register an agent built elsewhere. Its risk receiver should come from
    /// [`risk_receiver`](Self::risk_receiver) so config updates reach it.
    pub fn add(&mut self, cycle: DecisionCycle, period: Duration) -> Result<(), AgentStartupError> {
        let id = cycle.agent_id().clone();
        if self.agents.iter().any(|a| a.cycle.agent_id() == &id) {
            return Err(AgentStartupError::DuplicateId(id.0));
        }
        if period.is_zero() {
            return Err(AgentStartupError::ZeroInterval(id.0));
        }
        self.agents.push(ScheduledAgent {
            cycle: Arc::new(cycle),
            period,
        });
        Ok(())
    }

    pub fn risk_receiver(&self) -> watch::Receiver<Arc<RiskConfig>> {
        self.risk_tx.subscribe()
    }

    /// Publish a new rule set. Cycles already past `Gathering` finish on the
    /// old one.
    pub fn update_risk_config(&self, risk: Arc<RiskConfig>) {
        self.risk_tx.send_replace(risk);
        info!("Risk configuration replaced");
    }

    pub fn agents(&self) -> Vec<AgentHandle> {
        self.agents
            .iter()
            .map(|a| AgentHandle {
                agent_id: a.cycle.agent_id().clone(),
                ledger: Arc::clone(a.cycle.ledger()),
                status: a.cycle.status().clone(),
            })
            .collect()
    }

    /// Start one loop per agent. Calling it again does nothing.
    pub fn spawn(&mut self) {
        if !self.tasks.is_empty() {
            return;
        }
        for agent in &self.agents {
            self.tasks.push(tokio::spawn(run_agent(
                Arc::clone(&agent.cycle),
                agent.period,
                self.shutdown_tx.subscribe(),
            )));
        }
    }

    /// Stop every loop and wait for in-flight cycles to finish.
    pub async fn shutdown(self) {
        self.shutdown_tx.send_replace(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Agent task ended abnormally");
            }
        }
        info!("Scheduler stopped");
    }
}

async fn run_agent(cycle: Arc<DecisionCycle>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut next = cycle.ledger().last_cycle().await.map_or(1, |last| last + 1);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(agent = %cycle.agent_id(), first_cycle = next, period = ?period, "Agent loop started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        }

        // Errors are logged and counted inside run_once; the next tick starts fresh.
        if let Err(panic) = AssertUnwindSafe(cycle.run_once(next)).catch_unwind().await {
            let message = panic_message(panic.as_ref());
            error!(
                agent = %cycle.agent_id(),
                cycle = next,
                panic = %message,
                "Decision cycle panicked"
            );
            cycle.status().record_failure(format!("cycle panicked: {}", message));
        }
        next += 1;
    }

    info!(agent = %cycle.agent_id(), "Agent loop stopped");
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
