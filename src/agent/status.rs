use crate::domain::{AgentId, TimeMs};
use serde::Serialize;
use std::sync::{Arc, RwLock};

/// Where an agent is inside its decision cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    Gathering,
    AwaitingOracle,
    Validating,
    Executing,
    Recording,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentStatus {
    pub agent_id: AgentId,
    pub phase: CyclePhase,
    /// Cycle currently running, or the last one that ran.
    pub cycle_number: u64,
    pub cycles_run: u64,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub last_error: Option<String>,
    pub last_success: Option<TimeMs>,
}

/// Shared, copy-out view of one agent's status.
#[derive(Debug, Clone)]
pub struct StatusHandle(Arc<RwLock<AgentStatus>>);

impl StatusHandle {
    pub fn new(agent_id: AgentId) -> Self {
        Self(Arc::new(RwLock::new(AgentStatus {
            agent_id,
            phase: CyclePhase::Idle,
            cycle_number: 0,
            cycles_run: 0,
            consecutive_failures: 0,
            total_failures: 0,
            last_error: None,
            last_success: None,
        })))
    }

    pub fn snapshot(&self) -> AgentStatus {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn phase(&self) -> CyclePhase {
        self.0.read().unwrap_or_else(|e| e.into_inner()).phase
    }

    pub(crate) fn set_phase(&self, phase: CyclePhase) {
        self.update(|s| s.phase = phase);
    }

    pub(crate) fn begin_cycle(&self, cycle_number: u64) {
        self.update(|s| {
            s.cycle_number = cycle_number;
            s.cycles_run += 1;
            s.phase = CyclePhase::Gathering;
        });
    }

    pub(crate) fn record_success(&self, at: TimeMs) {
        self.update(|s| {
            s.consecutive_failures = 0;
            s.last_success = Some(at);
            s.phase = CyclePhase::Idle;
        });
    }

    pub(crate) fn record_failure(&self, error: String) {
        self.update(|s| {
            s.consecutive_failures = s.consecutive_failures.saturating_add(1);
            s.total_failures += 1;
            s.last_error = Some(error);
            s.phase = CyclePhase::Idle;
        });
    }

    fn update(&self, f: impl FnOnce(&mut AgentStatus)) {
        f(&mut self.0.write().unwrap_or_else(|e| e.into_inner()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_counters() {
        let status = StatusHandle::new(AgentId::new("a"));
        status.begin_cycle(1);
        status.record_failure("oracle timed out".to_string());
        status.begin_cycle(2);
        status.record_failure("exchange down".to_string());

        let snap = status.snapshot();
        assert_eq!(snap.consecutive_failures, 2);
        assert_eq!(snap.total_failures, 2);
        assert_eq!(snap.last_error.as_deref(), Some("exchange down"));
        assert_eq!(snap.phase, CyclePhase::Idle);

        status.begin_cycle(3);
        assert_eq!(status.phase(), CyclePhase::Gathering);
        status.record_success(TimeMs::new(5));

        let snap = status.snapshot();
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.total_failures, 2);
        assert_eq!(snap.cycles_run, 3);
        assert_eq!(snap.last_success, Some(TimeMs::new(5)));
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let status = StatusHandle::new(AgentId::new("a"));
        let before = status.snapshot();
        status.begin_cycle(9);
        assert_eq!(before.cycle_number, 0);
        assert_eq!(status.snapshot().cycle_number, 9);
    }
}
