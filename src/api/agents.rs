use super::AppState;
use crate::agent::CyclePhase;
use crate::error::AppError;
use axum::extract::State;
use axum::Json;
use futures::future::join_all;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentsResponse {
    pub agents: Vec<AgentDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDto {
    pub agent_id: String,
    pub phase: CyclePhase,
    pub cycle_number: u64,
    pub cycles_run: u64,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success: Option<String>,
    pub open_positions: usize,
    pub records: usize,
}

pub async fn get_agents(State(state): State<AppState>) -> Result<Json<AgentsResponse>, AppError> {
    let agents = join_all(state.agents.values().map(|handle| async move {
        let status = handle.status.snapshot();
        AgentDto {
            agent_id: status.agent_id.to_string(),
            phase: status.phase,
            cycle_number: status.cycle_number,
            cycles_run: status.cycles_run,
            consecutive_failures: status.consecutive_failures,
            total_failures: status.total_failures,
            last_error: status.last_error,
            last_success: status.last_success.map(|t| t.to_string()),
            open_positions: handle.ledger.open_positions().await.len(),
            records: handle.ledger.record_count().await,
        }
    }))
    .await;

    Ok(Json(AgentsResponse { agents }))
}
