//! Banner rotation service.
//!
//! Wires the statistics store, the selection bandit and the event
//! publisher together and serves the HTTP API.

use banner_api::ApiServer;
use banner_core::config::{AppConfig, StoreBackend};
use banner_events::{noop_publisher, EventPublisher, NatsPublisher};
use banner_rl_engine::WeightedBandit;
use banner_rotation::RotationProcessor;
use banner_store::{MemoryStore, RedisStore, StatisticsStore};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "banner-rotation")]
#[command(about = "Banner rotation service driven by a multi-armed bandit")]
#[command(version)]
struct Cli {
    /// Configuration file (JSON, YAML or TOML)
    #[arg(long, short, env = "BANNER_ROTATION_CONFIG")]
    config: Option<String>,

    /// Node identifier (overrides config)
    #[arg(long, env = "BANNER_ROTATION__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "BANNER_ROTATION__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Impressions after which a banner is rated by its CTR (overrides config)
    #[arg(long, env = "BANNER_ROTATION__ROTATION__WARM_THRESHOLD")]
    warm_threshold: Option<u64>,

    /// Seed for reproducible selection (overrides config)
    #[arg(long, env = "BANNER_ROTATION__ROTATION__SEED")]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "banner_rotation_server=info,banner_rotation=info,banner_store=info,\
                 banner_events=info,banner_api=info,tower_http=info"
                    .into()
            }),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Banner rotation starting up");

    let mut config = AppConfig::resolve(cli.config.as_deref()).map_err(|e| {
        error!(error = %e, "Failed to load config");
        e
    })?;

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(threshold) = cli.warm_threshold {
        config.rotation.warm_threshold = threshold;
    }
    if cli.seed.is_some() {
        config.rotation.seed = cli.seed;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        store = ?config.store.backend,
        warm_threshold = config.rotation.warm_threshold,
        nats = config.nats.enabled,
        "Configuration loaded"
    );

    let store: Arc<dyn StatisticsStore> = match config.store.backend {
        StoreBackend::Memory => {
            warn!("Using in-memory store, statistics are lost on restart");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Redis => Arc::new(RedisStore::new(&config.redis).await.map_err(|e| {
            error!(error = %e, "Failed to connect to Redis");
            e
        })?),
    };

    let publisher: Arc<dyn EventPublisher> = if config.nats.enabled {
        Arc::new(NatsPublisher::connect(&config.nats, config.node_id.clone()).await?)
    } else {
        info!("NATS disabled, actions will not be published");
        noop_publisher()
    };

    let bandit = match config.rotation.seed {
        Some(seed) => WeightedBandit::with_seed(config.rotation.warm_threshold, seed),
        None => WeightedBandit::new(config.rotation.warm_threshold),
    };

    let processor = Arc::new(RotationProcessor::new(store, Arc::new(bandit), publisher));
    let api_server = ApiServer::new(config.clone(), processor);

    if config.metrics.enabled {
        if let Err(e) = api_server.start_metrics().await {
            error!(error = %e, "Failed to start metrics exporter");
        }
    }

    info!("Banner rotation is ready to serve traffic");

    api_server.start_http().await?;

    info!("Banner rotation stopped");
    Ok(())
}
