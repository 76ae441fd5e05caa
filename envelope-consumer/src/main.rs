use anyhow::{ensure, Context, Result};
use envelope_router::config::Config;
use envelope_router::metrics::{serve, setup_metrics_router};
use envelope_router::Dispatcher;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod handlers;

use handlers::{log_single_bet_settle, MarketSettleProcessor, MARKET_SETTLE, SINGLE_BET_SETTLE};

fn start_server(config: &Config) -> JoinHandle<()> {
    let router = setup_metrics_router();
    let bind = config.bind_address();

    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    })
}

fn shutdown_on_ctrl_c(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, shutting down"),
            Err(e) => error!("Failed to listen for Ctrl-C, shutting down: {:#}", e),
        }
        shutdown.cancel();
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    info!("Starting envelope consumer");

    let config = Config::init_with_defaults()
        .context("Failed to load configuration from environment variables")?;
    ensure!(
        !config.topics().is_empty(),
        "KAFKA_CONSUMER_TOPICS must name at least one topic"
    );

    info!("Configuration loaded: {:?}", config);

    let server_handle = start_server(&config);
    info!("Started metrics server on {}", config.bind_address());

    let dispatcher = Dispatcher::from_config(&config)
        .with_context(|| format!("Failed to create Kafka consumer for {}", config.kafka_hosts))?
        .with_topics(config.topics())
        .context("Failed to subscribe to topics")?
        .with_processor(MARKET_SETTLE, MarketSettleProcessor)
        .with_function(SINGLE_BET_SETTLE, log_single_bet_settle);

    let shutdown = CancellationToken::new();
    shutdown_on_ctrl_c(shutdown.clone());

    dispatcher.run(shutdown, config.poll_timeout()).await;

    server_handle.abort();

    Ok(())
}
