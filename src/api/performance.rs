use crate::api::AppState;
use crate::engine::PerformanceSnapshot;
use crate::error::AppError;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct PerformanceQuery {
    pub agent: Option<String>,
    pub window: Option<String>,
}

/// Performance over the newest `window` closed trades; `window=0` covers all
/// of them.
pub async fn get_performance(
    Query(params): Query<PerformanceQuery>,
    State(state): State<AppState>,
) -> Result<Json<PerformanceSnapshot>, AppError> {
    let agent = state.agent(params.agent.as_deref())?;
    let window = match params.window.as_deref().map(str::trim) {
        None | Some("") => state.performance_window,
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| AppError::BadRequest("window must be a non-negative integer".into()))?,
    };
    Ok(Json(agent.ledger.performance(window).await))
}
