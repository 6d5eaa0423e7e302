use agentledger::config::AgentStartupError;
use agentledger::db::init_db;
use agentledger::{
    AgentId, AgentScheduler, Config, Decimal, Instrument, MarketData, MockMarketData, Repository,
    RiskConfig,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const AGENTS_JSON: &str = r#"[
    {
        "id": "alpha",
        "initial_equity": "10000",
        "universe": ["btc", "BTCUSDT"],
        "oracle": {"kind": "mock"},
        "interval_secs": 3600
    },
    {
        "id": "keyless",
        "initial_equity": "10000",
        "universe": ["BTCUSDT"],
        "oracle": {"kind": "http", "url": "http://localhost:9000/decide"}
    },
    {
        "id": "alpha",
        "initial_equity": "500",
        "universe": ["BTCUSDT"],
        "oracle": {"kind": "mock"}
    },
    {
        "id": "broke",
        "initial_equity": "0",
        "universe": ["BTCUSDT"],
        "oracle": {"kind": "mock"}
    }
]"#;

struct Fixture {
    config: Config,
    repo: Arc<Repository>,
    _temp: TempDir,
}

async fn fixture() -> Fixture {
    let temp_dir = TempDir::new().unwrap();
    let agents_path = temp_dir.path().join("agents.json");
    std::fs::write(&agents_path, AGENTS_JSON).unwrap();
    let db_path = temp_dir
        .path()
        .join("scheduler.db")
        .to_string_lossy()
        .to_string();

    let env: HashMap<String, String> = [
        ("DATABASE_PATH", db_path.clone()),
        ("AGENTS_FILE", agents_path.to_string_lossy().to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    let config = Config::from_env_map(env).unwrap();

    let pool = init_db(&db_path).await.expect("init_db failed");
    Fixture {
        config,
        repo: Arc::new(Repository::new(pool)),
        _temp: temp_dir,
    }
}

fn market() -> Arc<dyn MarketData> {
    Arc::new(MockMarketData::new().with_price(Instrument::new("BTCUSDT"), Decimal::from(60000i64)))
}

#[tokio::test]
async fn test_invalid_agents_refused_others_start() {
    let fx = fixture().await;
    let (scheduler, refused) =
        AgentScheduler::from_config(&fx.config, Some(fx.repo.clone()), market()).await;

    assert_eq!(
        refused,
        vec![
            AgentStartupError::MissingOracleCredentials("keyless".to_string(), "api_key"),
            AgentStartupError::DuplicateId("alpha".to_string()),
            AgentStartupError::NonPositiveEquity("broke".to_string()),
        ]
    );

    let agents = scheduler.agents();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].agent_id.as_str(), "alpha");
    assert!(agents[0].ledger.tracks(&Instrument::new("BTCUSDT")));
}

#[tokio::test]
async fn test_cycle_numbers_continue_after_restart() {
    let fx = fixture().await;

    for expected in [vec![1u64], vec![1, 2]] {
        let (mut scheduler, _) =
            AgentScheduler::from_config(&fx.config, Some(fx.repo.clone()), market()).await;
        let handle = scheduler.agents().remove(0);

        // The first tick fires immediately; the hour-long period keeps it to one cycle.
        scheduler.spawn();
        tokio::time::sleep(Duration::from_millis(200)).await;
        scheduler.shutdown().await;

        let cycles: Vec<u64> = handle
            .ledger
            .latest_records(10)
            .await
            .iter()
            .map(|r| r.cycle_number)
            .collect();
        assert_eq!(cycles, expected);
        assert_eq!(handle.status.snapshot().cycles_run, 1);
    }
}

#[tokio::test]
async fn test_in_memory_scheduler_without_repository() {
    let fx = fixture().await;
    let (mut scheduler, refused) = AgentScheduler::from_config(&fx.config, None, market()).await;
    assert_eq!(refused.len(), 3);

    let handle = scheduler.agents().remove(0);
    scheduler.spawn();
    // Spawning twice does not start a second loop.
    scheduler.spawn();
    tokio::time::sleep(Duration::from_millis(200)).await;
    scheduler.shutdown().await;

    assert_eq!(handle.ledger.record_count().await, 1);
    // Nothing reached the database.
    assert!(fx.repo.load_records(&AgentId::new("alpha")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_risk_config_update_reaches_subscribers() {
    let scheduler = AgentScheduler::new(Arc::new(RiskConfig::default()));
    let mut rx = scheduler.risk_receiver();
    assert_eq!(rx.borrow().max_leverage_major, 50);

    scheduler.update_risk_config(Arc::new(RiskConfig {
        max_leverage_major: 5,
        ..RiskConfig::default()
    }));

    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().max_leverage_major, 5);
}
