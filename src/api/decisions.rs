use super::{parse_limit, AppState};
use crate::domain::DecisionRecord;
use crate::error::AppError;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct DecisionsQuery {
    pub agent: Option<String>,
    pub limit: Option<String>,
}

/// Latest decision records, oldest first.
pub async fn get_decisions(
    Query(params): Query<DecisionsQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<DecisionRecord>>, AppError> {
    let agent = state.agent(params.agent.as_deref())?;
    let limit = parse_limit("limit", params.limit.as_deref(), DEFAULT_LIMIT, MAX_LIMIT)?;
    Ok(Json(agent.ledger.latest_records(limit).await))
}
