use agentledger::db::init_db;
use agentledger::engine::realized_pnl;
use agentledger::ledger::{CycleEntry, PositionLedger, TradeQuery};
use agentledger::{ActionKind, AgentId, Decimal, Instrument, Repository, TimeMs, TradeAction};
use std::sync::Arc;
use tempfile::TempDir;

const T0: i64 = 1_700_000_000_000;
const TWO_HOURS_MS: i64 = 2 * 60 * 60 * 1000;

fn d(s: &str) -> Decimal {
    Decimal::from_str_canonical(s).unwrap()
}

fn action(symbol: &str, kind: ActionKind, px: &str, qty: &str, leverage: u32, time_ms: i64) -> TradeAction {
    TradeAction {
        instrument: Instrument::new(symbol),
        kind,
        price: d(px),
        quantity: d(qty),
        leverage,
        time_ms: TimeMs::new(time_ms),
        cycle_number: 0,
        confidence: 70,
    }
}

fn entry(cycle: u64, time_ms: i64, actions: Vec<TradeAction>) -> CycleEntry {
    CycleEntry {
        cycle_number: cycle,
        time_ms: TimeMs::new(time_ms),
        actions,
        rationale: format!("cycle {}", cycle),
        notes: vec![format!("note {}", cycle)],
    }
}

async fn setup_repo() -> (Arc<Repository>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("ledger.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    (Arc::new(Repository::new(pool)), temp_dir)
}

#[tokio::test]
async fn test_open_close_end_to_end() {
    let (repo, _temp) = setup_repo().await;
    let ledger = PositionLedger::restore(AgentId::new("alpha"), Vec::new(), repo)
        .await
        .unwrap();

    ledger
        .append(entry(1, T0, vec![action("BTCUSDT", ActionKind::OpenLong, "60000", "1", 10, T0)]))
        .await
        .unwrap();
    assert_eq!(ledger.open_positions().await.len(), 1);

    let report = ledger
        .append(entry(
            2,
            T0 + TWO_HOURS_MS,
            vec![action("BTCUSDT", ActionKind::CloseLong, "63000", "1", 10, T0 + TWO_HOURS_MS)],
        ))
        .await
        .unwrap();

    let closed = report.record.actions[0].closed.as_ref().expect("matched close");
    assert_eq!(closed.pnl, d("3000"));
    assert_eq!(closed.margin_used, d("6000"));
    assert_eq!(closed.pnl_pct, d("50"));
    assert_eq!(closed.duration_secs, 7200);
    assert_eq!(closed.entry_price, d("60000"));
    assert!(ledger.open_positions().await.is_empty());
}

#[tokio::test]
async fn test_orphaned_close_has_no_pnl() {
    let ledger = PositionLedger::new(AgentId::new("alpha"), Vec::new());
    let report = ledger
        .append(entry(1, T0, vec![action("ETHUSDT", ActionKind::CloseLong, "3000", "2", 5, T0)]))
        .await
        .unwrap();

    let event = &report.record.actions[0];
    assert!(event.is_orphaned_close());

    let json = serde_json::to_value(event).unwrap();
    assert!(json.get("closed").is_none());
    assert_eq!(json["kind"], "close_long");
}

#[tokio::test]
async fn test_close_quantity_defaults_to_open_quantity() {
    let ledger = PositionLedger::new(AgentId::new("alpha"), Vec::new());
    ledger
        .append(entry(
            1,
            T0,
            vec![
                action("SOLUSDT", ActionKind::OpenShort, "150", "10", 3, T0),
                action("SOLUSDT", ActionKind::CloseShort, "140", "0", 3, T0 + 1_000),
            ],
        ))
        .await
        .unwrap();

    let events = ledger.trade_events(&TradeQuery::default()).await;
    let closed = events[1].closed.as_ref().unwrap();
    assert_eq!(closed.quantity, d("10"));
    assert_eq!(closed.pnl, d("100"));
    assert_eq!(closed.margin_used, d("500"));
    assert_eq!(closed.pnl_pct, d("20"));
}

#[tokio::test]
async fn test_stored_pnl_matches_formula() {
    let ledger = PositionLedger::new(AgentId::new("alpha"), Vec::new());
    let pairs = [
        ("BTCUSDT", ActionKind::OpenLong, ActionKind::CloseLong, "60000", "61234.5", "0.25"),
        ("BTCUSDT", ActionKind::OpenShort, ActionKind::CloseShort, "61000", "62000", "0.1"),
        ("ETHUSDT", ActionKind::OpenLong, ActionKind::CloseLong, "3000", "2875.25", "3"),
        ("DOGEUSDT", ActionKind::OpenShort, ActionKind::CloseShort, "0.08", "0.071", "50000"),
    ];

    let mut cycle = 0;
    for (symbol, open, close, entry_px, exit_px, qty) in pairs {
        cycle += 1;
        let t = T0 + cycle as i64 * 60_000;
        ledger
            .append(entry(
                cycle,
                t,
                vec![
                    action(symbol, open, entry_px, qty, 4, t),
                    action(symbol, close, exit_px, qty, 4, t + 30_000),
                ],
            ))
            .await
            .unwrap();
    }

    let events = ledger.trade_events(&TradeQuery::default()).await;
    let mut matched = 0;
    for pair in events.chunks(2) {
        let (open, close) = (&pair[0].action, &pair[1]);
        let closed = close.closed.as_ref().unwrap();
        let expected = realized_pnl(
            open.kind.direction(),
            open.quantity,
            open.price,
            close.action.price,
        );
        assert_eq!(closed.pnl, expected);
        assert_eq!(closed.duration_secs, 30);
        matched += 1;
    }
    assert_eq!(matched, 4);
}

#[tokio::test]
async fn test_reads_are_idempotent_copies() {
    let ledger = PositionLedger::new(AgentId::new("alpha"), Vec::new());
    ledger
        .append(entry(1, T0, vec![action("BTCUSDT", ActionKind::OpenLong, "60000", "1", 10, T0)]))
        .await
        .unwrap();

    let positions_a = ledger.open_positions().await;
    let positions_b = ledger.open_positions().await;
    assert_eq!(positions_a, positions_b);

    let mut records_a = ledger.latest_records(5).await;
    let records_b = ledger.latest_records(5).await;
    assert_eq!(records_a, records_b);

    // Mutating a returned copy does not reach the ledger.
    records_a[0].rationale.push_str(" (edited)");
    records_a[0].actions.clear();
    assert_eq!(ledger.latest_records(5).await, records_b);
}

#[tokio::test]
async fn test_latest_records_oldest_first() {
    let ledger = PositionLedger::new(AgentId::new("alpha"), Vec::new());
    for cycle in 1..=5 {
        ledger.append(entry(cycle, T0, Vec::new())).await.unwrap();
    }
    let latest: Vec<u64> = ledger
        .latest_records(3)
        .await
        .iter()
        .map(|r| r.cycle_number)
        .collect();
    assert_eq!(latest, vec![3, 4, 5]);
}

#[tokio::test]
async fn test_restore_reproduces_events() {
    let (repo, _temp) = setup_repo().await;
    let universe = vec![Instrument::new("BTCUSDT"), Instrument::new("ETHUSDT")];

    let original = PositionLedger::restore(AgentId::new("alpha"), universe.clone(), repo.clone())
        .await
        .unwrap();
    original
        .append(entry(
            1,
            T0,
            vec![
                action("BTCUSDT", ActionKind::OpenLong, "60000", "1", 10, T0),
                action("ETHUSDT", ActionKind::OpenShort, "3000.5", "2.125", 5, T0),
            ],
        ))
        .await
        .unwrap();
    original
        .append(entry(
            2,
            T0 + TWO_HOURS_MS,
            vec![
                action("BTCUSDT", ActionKind::CloseLong, "63000", "1", 10, T0 + TWO_HOURS_MS),
                action("ETHUSDT", ActionKind::CloseLong, "2900", "1", 5, T0 + TWO_HOURS_MS),
            ],
        ))
        .await
        .unwrap();

    let restored = PositionLedger::restore(AgentId::new("alpha"), universe, repo)
        .await
        .unwrap();

    let query = TradeQuery::default();
    assert_eq!(
        restored.trade_events(&query).await,
        original.trade_events(&query).await
    );
    assert_eq!(restored.open_positions().await, original.open_positions().await);
    assert_eq!(restored.latest_records(10).await, original.latest_records(10).await);
    assert_eq!(restored.last_cycle().await, Some(2));

    // Cycle numbers keep increasing across restarts.
    assert!(restored.append(entry(2, T0, Vec::new())).await.is_err());
    tokio_test::assert_ok!(restored.append(entry(3, T0, Vec::new())).await);
}

#[tokio::test]
async fn test_agents_do_not_share_records() {
    let (repo, _temp) = setup_repo().await;
    let alpha = PositionLedger::restore(AgentId::new("alpha"), Vec::new(), repo.clone())
        .await
        .unwrap();
    let beta = PositionLedger::restore(AgentId::new("beta"), Vec::new(), repo.clone())
        .await
        .unwrap();

    alpha
        .append(entry(1, T0, vec![action("BTCUSDT", ActionKind::OpenLong, "60000", "1", 10, T0)]))
        .await
        .unwrap();
    beta.append(entry(1, T0, Vec::new())).await.unwrap();

    let beta_again = PositionLedger::restore(AgentId::new("beta"), Vec::new(), repo)
        .await
        .unwrap();
    assert!(beta_again.open_positions().await.is_empty());
    assert_eq!(beta_again.record_count().await, 1);
}

#[tokio::test]
async fn test_reads_not_blocked_while_cycle_is_persisted() {
    let (repo, _temp) = setup_repo().await;
    let ledger = Arc::new(
        PositionLedger::restore(AgentId::new("alpha"), Vec::new(), repo.clone())
            .await
            .unwrap(),
    );
    ledger
        .append(entry(1, T0, vec![action("BTCUSDT", ActionKind::OpenLong, "60000", "1", 10, T0)]))
        .await
        .unwrap();

    // Another writer holds the database lock, so the next insert has to wait.
    let mut blocker = repo.pool().begin().await.unwrap();
    sqlx::query(
        "INSERT INTO decision_records \
         (agent_id, cycle_number, time_ms, rationale, notes_json, created_at) \
         VALUES ('other', 1, 0, '', '[]', 0)",
    )
    .execute(&mut *blocker)
    .await
    .unwrap();

    let writer = ledger.clone();
    let close_at = T0 + TWO_HOURS_MS;
    let pending = tokio::spawn(async move {
        let close = action("BTCUSDT", ActionKind::CloseLong, "63000", "1", 10, close_at);
        writer.append(entry(2, close_at, vec![close])).await
    });
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let open = tokio::time::timeout(std::time::Duration::from_millis(500), ledger.open_positions())
        .await
        .expect("reader waited on persistence");
    assert_eq!(open.len(), 1);
    assert_eq!(ledger.last_cycle().await, Some(1));

    blocker.rollback().await.unwrap();
    tokio_test::assert_ok!(pending.await.unwrap());
    assert!(ledger.open_positions().await.is_empty());
    assert_eq!(ledger.last_cycle().await, Some(2));
}
