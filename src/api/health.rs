use super::AppState;
use crate::error::AppError;
use axum::extract::State;
use axum::Json;
use tracing::warn;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Ready once the database answers. Without a database the process is
/// running in memory only and is always ready.
pub async fn ready(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    if let Some(repo) = &state.repo {
        if let Err(e) = repo.ping().await {
            warn!(error = %e, "Readiness check failed");
            return Err(AppError::Unavailable(format!("database: {}", e)));
        }
    }
    Ok(Json(serde_json::json!({
        "status": "ready",
        "agents": state.agents.len(),
    })))
}
