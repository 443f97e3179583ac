use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use bs_broker::{AmqpConfig, AmqpPublisher};
use bs_metrics::{MetricsConfig, MetricsServer};
use bs_store::PgItemsRepo;

use bs_relay::config::Config;
use bs_relay::dispatch::{Relay, RelayConfig};
use bs_relay::http::InfoServer;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = Config::parse();

    // Metrics
    let ms = MetricsServer::install(MetricsConfig {
        listen: cfg.metrics_listen.clone(),
        namespace: "bs",
    })?;
    tokio::spawn(async move {
        let _ = ms.serve().await;
    });

    // Postgres
    let pool = PgPoolOptions::new()
        .max_connections(16)
        .connect(&cfg.database_url)
        .await?;

    sqlx::migrate!("../store/migrations").run(&pool).await?;

    let repo = PgItemsRepo::new(pool, Duration::from_secs(cfg.claim_ttl_s));

    // Broker
    let publisher = AmqpPublisher::connect(&AmqpConfig {
        url: cfg.amqp_url.clone(),
        queue: cfg.queue.clone(),
    })
    .await?;

    let relay = Relay::new(
        repo,
        publisher,
        RelayConfig {
            poll_interval: Duration::from_millis(cfg.poll_ms),
            batch_size: cfg.batch,
            publish_timeout: Duration::from_millis(cfg.publish_timeout_ms),
            max_attempts: cfg.max_attempts,
            backoff_cap: Duration::from_millis(cfg.backoff_cap_ms),
        },
    );

    info!("relay starting");
    let api = InfoServer::new(cfg.listen.clone(), relay.stats());
    tokio::spawn(async move {
        let _ = api.serve().await;
    });

    tokio::select! {
        r = relay.run() => r?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown");
        }
    }

    Ok(())
}
