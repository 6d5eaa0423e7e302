//! Agent runtime: the per-agent decision cycle and the scheduler that drives it.

pub mod cycle;
pub mod scheduler;
pub mod status;

pub use cycle::{CycleError, CycleReport, DecisionCycle};
pub use scheduler::{AgentHandle, AgentScheduler};
pub use status::{AgentStatus, CyclePhase, StatusHandle};
