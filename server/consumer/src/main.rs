use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use bs_broker::{AmqpConfig, AmqpSource};
use bs_metrics::{MetricsConfig, MetricsServer};
use bs_store::PgIndexStore;

use bs_consumer::config::Config;
use bs_consumer::http::InfoServer;
use bs_consumer::ingest::{Ingestor, IngestorConfig};

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

    // Postgres (index projection)
    let pool = PgPoolOptions::new()
        .max_connections(16)
        .connect(&cfg.database_url)
        .await?;

    sqlx::migrate!("../store/migrations").run(&pool).await?;
    let index = PgIndexStore::new(pool);

    // Broker subscription
    let source = AmqpSource::connect(
        AmqpConfig {
            url: cfg.amqp_url.clone(),
            queue: cfg.queue.clone(),
        },
        cfg.prefetch,
    )
    .await?;

    let mut ingestor = Ingestor::new(
        source,
        index.clone(),
        IngestorConfig {
            base_backoff: Duration::from_millis(cfg.backoff_ms),
            backoff_cap: Duration::from_millis(cfg.backoff_cap_ms),
        },
    );

    info!("consumer starting");
    let api = InfoServer::new(
        cfg.listen.clone(),
        ingestor.stats(),
        ingestor.connection(),
        index,
    );
    tokio::spawn(async move {
        let _ = api.serve().await;
    });

    tokio::select! {
        r = ingestor.run() => r?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown");
        }
    }

    Ok(())
}
