//! Decision record and trade action operations for the repository.

use crate::domain::{AgentId, Decimal, DecisionRecord, RawTradeAction, TimeMs};
use sqlx::Row;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::warn;

use super::Repository;

/// One persisted cycle as read back, actions still untyped.
///
/// Derived PnL is never stored; callers rebuild it by replaying `actions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub agent_id: AgentId,
    pub cycle_number: u64,
    pub time_ms: TimeMs,
    pub rationale: String,
    pub notes: Vec<String>,
    pub actions: Vec<RawTradeAction>,
}

impl Repository {
    /// Insert one decision record and all of its trade actions in a single
    /// transaction.
    ///
    /// Returns `false` without writing anything if the record's
    /// (agent, cycle) pair is already stored.
    ///
    /// # Errors
    /// Returns an error if the transaction fails; nothing is committed then.
    pub async fn insert_cycle(&self, record: &DecisionRecord) -> Result<bool, sqlx::Error> {
        let notes_json = serde_json::to_string(&record.notes)
            .map_err(|e| sqlx::Error::Protocol(format!("notes encode: {e}")))?;

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO decision_records (
                agent_id, cycle_number, time_ms, rationale, notes_json, created_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(agent_id, cycle_number) DO NOTHING
            "#,
        )
        .bind(record.agent_id.as_str())
        .bind(record.cycle_number as i64)
        .bind(record.time_ms.as_ms())
        .bind(record.rationale.as_str())
        .bind(notes_json)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        for (seq, event) in record.actions.iter().enumerate() {
            let action = &event.action;
            sqlx::query(
                r#"
                INSERT INTO trade_actions (
                    action_key, agent_id, cycle_number, seq, instrument, kind,
                    price, quantity, leverage, time_ms, confidence
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(action_key) DO NOTHING
                "#,
            )
            .bind(action.action_key(&record.agent_id, seq))
            .bind(record.agent_id.as_str())
            .bind(record.cycle_number as i64)
            .bind(seq as i64)
            .bind(action.instrument.as_str())
            .bind(action.kind.as_str())
            .bind(action.price.to_canonical_string())
            .bind(action.quantity.to_canonical_string())
            .bind(action.leverage as i64)
            .bind(action.time_ms.as_ms())
            .bind(action.confidence as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Load every stored cycle of one agent, ordered by cycle number, each
    /// with its actions in execution order.
    ///
    /// Rows whose decimals fail to parse are logged and dropped.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn load_records(&self, agent: &AgentId) -> Result<Vec<StoredRecord>, sqlx::Error> {
        let record_rows = sqlx::query(
            r#"
            SELECT cycle_number, time_ms, rationale, notes_json
            FROM decision_records
            WHERE agent_id = ?
            ORDER BY cycle_number ASC
            "#,
        )
        .bind(agent.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut records: BTreeMap<u64, StoredRecord> = BTreeMap::new();
        for row in &record_rows {
            let cycle_number: i64 = row.get("cycle_number");
            let notes_json: String = row.get("notes_json");
            let notes = serde_json::from_str(&notes_json).unwrap_or_else(|e| {
                warn!(
                    agent = %agent,
                    cycle = cycle_number,
                    error = %e,
                    "Failed to parse stored notes, using empty list"
                );
                Vec::new()
            });

            records.insert(
                cycle_number as u64,
                StoredRecord {
                    agent_id: agent.clone(),
                    cycle_number: cycle_number as u64,
                    time_ms: TimeMs::new(row.get("time_ms")),
                    rationale: row.get("rationale"),
                    notes,
                    actions: Vec::new(),
                },
            );
        }

        let action_rows = sqlx::query(
            r#"
            SELECT action_key, cycle_number, instrument, kind, price, quantity,
                   leverage, time_ms, confidence
            FROM trade_actions
            WHERE agent_id = ?
            ORDER BY cycle_number ASC, seq ASC
            "#,
        )
        .bind(agent.as_str())
        .fetch_all(&self.pool)
        .await?;

        for row in &action_rows {
            let action_key: String = row.get("action_key");
            let cycle_number = row.get::<i64, _>("cycle_number") as u64;
            let price_str: String = row.get("price");
            let quantity_str: String = row.get("quantity");

            let (price, quantity) = match (
                Decimal::from_str(&price_str),
                Decimal::from_str(&quantity_str),
            ) {
                (Ok(price), Ok(quantity)) => (price, quantity),
                _ => {
                    warn!(
                        action_key = %action_key,
                        price = %price_str,
                        quantity = %quantity_str,
                        "Failed to parse stored trade action decimals, dropping row"
                    );
                    continue;
                }
            };

            let Some(record) = records.get_mut(&cycle_number) else {
                warn!(
                    action_key = %action_key,
                    cycle = cycle_number,
                    "Trade action without decision record, dropping row"
                );
                continue;
            };

            record.actions.push(RawTradeAction {
                instrument: row.get("instrument"),
                kind: row.get("kind"),
                price,
                quantity,
                leverage: row.get::<i64, _>("leverage").max(0) as u32,
                time_ms: TimeMs::new(row.get("time_ms")),
                cycle_number,
                confidence: row.get::<i64, _>("confidence").max(0) as u32,
            });
        }

        Ok(records.into_values().collect())
    }
}
