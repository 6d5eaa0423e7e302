use crate::api::AppState;
use crate::domain::OpenPosition;
use crate::engine::realized_pnl;
use crate::error::AppError;
use crate::market::MarketData;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct PositionsQuery {
    pub agent: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsResponse {
    pub positions: Vec<PositionDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionDto {
    pub symbol: String,
    pub side: String,
    pub entry_price: String,
    pub quantity: String,
    pub leverage: u32,
    pub margin_used: String,
    pub opened_at: String,
    /// Omitted when the mark price cannot be fetched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mark_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unrealized_pnl: Option<String>,
}

pub async fn get_positions(
    Query(params): Query<PositionsQuery>,
    State(state): State<AppState>,
) -> Result<Json<PositionsResponse>, AppError> {
    let agent = state.agent(params.agent.as_deref())?;
    let open = agent.ledger.open_positions().await;

    let mut positions = Vec::with_capacity(open.len());
    for position in open {
        let mark = state.market.price(&position.instrument).await.ok();
        positions.push(to_dto(position, mark));
    }

    Ok(Json(PositionsResponse { positions }))
}

fn to_dto(position: OpenPosition, mark: Option<crate::domain::Decimal>) -> PositionDto {
    let snapshot = &position.snapshot;
    let unrealized = mark.map(|price| {
        realized_pnl(position.direction, snapshot.quantity, snapshot.entry_price, price)
            .to_canonical_string()
    });
    PositionDto {
        symbol: position.instrument.as_str().to_string(),
        side: position.direction.to_string(),
        entry_price: snapshot.entry_price.to_canonical_string(),
        quantity: snapshot.quantity.to_canonical_string(),
        leverage: snapshot.leverage,
        margin_used: snapshot.margin_used().to_canonical_string(),
        opened_at: snapshot.opened_at.to_string(),
        mark_price: mark.map(|m| m.to_canonical_string()),
        unrealized_pnl: unrealized,
    }
}
