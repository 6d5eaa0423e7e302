pub mod agents;
pub mod decisions;
pub mod health;
pub mod market;
pub mod performance;
pub mod positions;
pub mod trades;

use crate::agent::AgentHandle;
use crate::db::Repository;
use crate::domain::{AgentId, TimeMs};
use crate::error::AppError;
use crate::market::CachedMarketData;
use axum::{routing::get, Router};
use chrono::{DateTime, NaiveDateTime};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub agents: Arc<BTreeMap<AgentId, AgentHandle>>,
    pub market: Arc<CachedMarketData>,
    pub repo: Option<Arc<Repository>>,
    pub performance_window: usize,
}

impl AppState {
    pub fn new(
        agents: Vec<AgentHandle>,
        market: Arc<CachedMarketData>,
        repo: Option<Arc<Repository>>,
        performance_window: usize,
    ) -> Self {
        Self {
            agents: Arc::new(
                agents
                    .into_iter()
                    .map(|handle| (handle.agent_id.clone(), handle))
                    .collect(),
            ),
            market,
            repo,
            performance_window,
        }
    }

    /// Resolve the `agent` query parameter. It may be omitted when exactly
    /// one agent is running.
    pub fn agent(&self, id: Option<&str>) -> Result<&AgentHandle, AppError> {
        match id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => self
                .agents
                .get(&AgentId::new(id))
                .ok_or_else(|| AppError::NotFound(format!("agent {} not found", id))),
            None if self.agents.len() == 1 => self
                .agents
                .values()
                .next()
                .ok_or_else(|| AppError::Internal("agent registry is empty".to_string())),
            None => Err(AppError::BadRequest("agent parameter is required".to_string())),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/agents", get(agents::get_agents))
        .route("/v1/trades", get(trades::get_trades))
        .route("/v1/positions", get(positions::get_positions))
        .route("/v1/performance", get(performance::get_performance))
        .route("/v1/decisions", get(decisions::get_decisions))
        .route("/v1/market/kline", get(market::get_kline))
        .layer(cors)
        .with_state(state)
}

/// Read a `limit`-style parameter: absent means `default`, above `max` is
/// clamped, anything not a positive integer is a bad request.
pub(crate) fn parse_limit(
    name: &str,
    raw: Option<&str>,
    default: usize,
    max: usize,
) -> Result<usize, AppError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(default),
        Some(value) => match value.parse::<i64>() {
            Ok(n) if n > 0 => Ok(usize::try_from(n).unwrap_or(max).min(max)),
            _ => Err(AppError::BadRequest(format!(
                "{} must be a positive integer",
                name
            ))),
        },
    }
}

/// RFC 3339, or `YYYY-MM-DD HH:MM:SS` / `YYYY-MM-DDTHH:MM:SS` taken as UTC.
/// Unreadable values are ignored rather than rejected.
pub(crate) fn parse_time(raw: Option<&str>) -> Option<TimeMs> {
    let value = raw.map(str::trim).filter(|s| !s.is_empty())?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(TimeMs::new(dt.timestamp_millis()));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(value, layout).ok())
        .map(|naive| TimeMs::new(naive.and_utc().timestamp_millis()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_limit() {
        assert_eq!(parse_limit("limit", None, 200, 1000).unwrap(), 200);
        assert_eq!(parse_limit("limit", Some("50"), 200, 1000).unwrap(), 50);
        assert_eq!(parse_limit("limit", Some("5000"), 200, 1000).unwrap(), 1000);
        assert!(parse_limit("limit", Some("0"), 200, 1000).is_err());
        assert!(parse_limit("limit", Some("-3"), 200, 1000).is_err());
        assert!(parse_limit("limit", Some("ten"), 200, 1000).is_err());
    }

    #[test]
    fn test_parse_time_layouts() {
        let expected = Some(TimeMs::new(1_700_000_000_000));
        assert_eq!(parse_time(Some("2023-11-14T22:13:20Z")), expected);
        assert_eq!(parse_time(Some("2023-11-15T06:13:20+08:00")), expected);
        assert_eq!(parse_time(Some("2023-11-14 22:13:20")), expected);
        assert_eq!(parse_time(Some("2023-11-14T22:13:20")), expected);
        assert_eq!(parse_time(Some("yesterday")), None);
        assert_eq!(parse_time(Some("")), None);
    }
}
