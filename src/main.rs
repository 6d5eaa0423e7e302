use agentledger::market::{BinanceMarketData, CachedMarketData, MarketData};
use agentledger::{api, config::Config, db::init_db, AgentScheduler, Repository};
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("configuration error")?;
    let port = config.port;

    let pool = init_db(&config.database_path)
        .await
        .with_context(|| format!("failed to initialize database at {}", config.database_path))?;
    let repo = Arc::new(Repository::new(pool));

    let upstream: Arc<dyn MarketData> = Arc::new(
        BinanceMarketData::new(config.market_data_url.clone(), config.timeouts.market)
            .context("failed to build market data client")?,
    );
    let market = Arc::new(CachedMarketData::new(upstream, config.kline_cache_ttl));

    let (mut scheduler, refused) =
        AgentScheduler::from_config(&config, Some(repo.clone()), market.clone()).await;
    for failure in &refused {
        tracing::error!(error = %failure, "Agent not started");
    }
    let state = api::AppState::new(
        scheduler.agents(),
        market,
        Some(repo),
        config.performance_window,
    );
    scheduler.spawn();

    let app = api::create_router(state);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("server error")?;

    scheduler.shutdown().await;
    Ok(())
}
