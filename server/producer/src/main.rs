mod config;
mod http;
mod service;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use bs_metrics::{MetricsConfig, MetricsServer};
use bs_store::PgItemsRepo;

use crate::config::Config;
use crate::http::InfoServer;
use crate::service::ItemsProducer;

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

    let repo = PgItemsRepo::new(pool, Duration::from_secs(30));
    let producer = Arc::new(ItemsProducer::new(repo));

    info!("producer starting");
    let api = InfoServer::new(cfg.listen.clone(), cfg.max_batch, producer);

    tokio::select! {
        r = api.serve() => r?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown");
        }
    }

    Ok(())
}
