use super::{parse_limit, AppState};
use crate::domain::{Instrument, Kline};
use crate::error::AppError;
use crate::market::MarketData;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

const DEFAULT_SYMBOL: &str = "SOL";
const DEFAULT_INTERVAL: &str = "3m";
const DEFAULT_LIMIT: usize = 500;
const MAX_LIMIT: usize = 1500;

#[derive(Debug, Deserialize)]
pub struct KlineQuery {
    pub symbol: Option<String>,
    pub interval: Option<String>,
    pub limit: Option<String>,
}

/// Candles through the short-lived read-through cache.
pub async fn get_kline(
    Query(params): Query<KlineQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Kline>>, AppError> {
    let symbol = params
        .symbol
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SYMBOL);
    let interval = params
        .interval
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_INTERVAL);
    let limit = parse_limit("limit", params.limit.as_deref(), DEFAULT_LIMIT, MAX_LIMIT)?;

    let klines = state
        .market
        .klines(&Instrument::normalize(symbol), interval, limit)
        .await?;
    Ok(Json(klines))
}
