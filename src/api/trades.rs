use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{parse_limit, parse_time, AppState};
use crate::domain::{Instrument, TradeEvent};
use crate::error::AppError;
use crate::ledger::TradeQuery;

const DEFAULT_LIMIT: usize = 200;
const MAX_LIMIT: usize = 1000;
const MIN_LOOKBACK: usize = 600;
const MAX_LOOKBACK: usize = 5000;

#[derive(Debug, Deserialize)]
pub struct TradesQuery {
    pub agent: Option<String>,
    pub symbol: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeDto {
    pub symbol: String,
    pub side: String,
    pub action: String,
    pub timestamp: String,
    pub time_ms: i64,
    pub price: String,
    pub quantity: String,
    pub leverage: u32,
    pub confidence: u32,
    pub cycle_number: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pnl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pnl_pct: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<i64>,
}

impl From<TradeEvent> for TradeDto {
    fn from(event: TradeEvent) -> Self {
        let action = event.action;
        let closed = event.closed;
        TradeDto {
            symbol: action.instrument.as_str().to_string(),
            side: action.kind.direction().to_string(),
            action: action.kind.to_string(),
            timestamp: action.time_ms.to_string(),
            time_ms: action.time_ms.as_ms(),
            price: action.price.to_canonical_string(),
            quantity: action.quantity.to_canonical_string(),
            leverage: action.leverage,
            confidence: action.confidence,
            cycle_number: action.cycle_number,
            pnl: closed.as_ref().map(|c| c.pnl.to_canonical_string()),
            pnl_pct: closed.as_ref().map(|c| c.pnl_pct.to_canonical_string()),
            duration: closed.as_ref().map(|c| format_duration(c.duration_secs)),
            duration_secs: closed.as_ref().map(|c| c.duration_secs),
        }
    }
}

/// Trade events for one agent, newest `limit` of them, oldest first.
pub async fn get_trades(
    Query(params): Query<TradesQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<TradeDto>>, AppError> {
    let agent = state.agent(params.agent.as_deref())?;
    let limit = parse_limit("limit", params.limit.as_deref(), DEFAULT_LIMIT, MAX_LIMIT)?;

    let instrument = params
        .symbol
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Instrument::normalize);

    let query = TradeQuery {
        instrument,
        from: parse_time(params.from.as_deref()),
        to: parse_time(params.to.as_deref()),
        lookback_records: Some((limit * 6).clamp(MIN_LOOKBACK, MAX_LOOKBACK)),
        limit: Some(limit),
    };

    let events = agent.ledger.trade_events(&query).await;
    Ok(Json(events.into_iter().map(TradeDto::from).collect()))
}

/// Render seconds as hours, minutes and seconds, e.g. `2h0m0s`, `3m5s`, `42s`.
pub(crate) fn format_duration(secs: i64) -> String {
    let sign = if secs < 0 { "-" } else { "" };
    let total = secs.unsigned_abs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}{}h{}m{}s", sign, hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}{}m{}s", sign, minutes, seconds)
    } else {
        format!("{}{}s", sign, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(7200), "2h0m0s");
        assert_eq!(format_duration(185), "3m5s");
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(-61), "-1m1s");
    }
}
