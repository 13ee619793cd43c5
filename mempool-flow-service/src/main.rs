//! Mempool Flow - fee estimation from mempool contents and transaction inflow

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use mempool_flow_service::{
    bitcoin::{BitcoinRpcClient, MockNode, NodeClient},
    cli::{read_cookie_file, Cli, Command},
    config::{AppConfig, StorageBackend},
    persistence::{HistoryStore, MemoryStore, SqliteStore, SummaryStore, TxLogStore},
    service::{EstimationRun, MempoolLogger, SummaryEngine},
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing to stderr, stdout carries the run output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_filter.clone().into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();

    info!("Mempool Flow starting...");

    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::load(),
    }
    .context("Failed to load configuration")?;

    if let Some(cookie_file) = &cli.rpc_cookie_file {
        let (username, password) = read_cookie_file(cookie_file)?;
        config.bitcoin_rpc.username = username;
        config.bitcoin_rpc.password = password;
        info!("Using credentials from cookie file");
    }

    if cli.test_mode {
        info!("Test mode: using mock node and in-memory storage");
        config.storage.backend = StorageBackend::Memory;
    }

    info!("Configuration loaded:");
    info!("  Bitcoin RPC: {}", config.bitcoin_rpc.url);
    info!("  Storage: {:?} ({})", config.storage.backend, config.storage.path);
    info!("  Windows: {:?} minutes", config.estimation.windows_minutes);

    let node = Arc::new(if cli.test_mode {
        NodeClient::Mock(MockNode::with_sample_mempool(Utc::now().timestamp()))
    } else {
        NodeClient::Real(BitcoinRpcClient::new(config.to_bitcoin_rpc_config()))
    });

    let result = match config.storage.backend {
        StorageBackend::Sqlite => {
            let store = SqliteStore::open(&config.storage.path, config.summary_ttl())
                .context("Failed to open SQLite store")?;
            run_command(&cli, &config, Arc::clone(&node), Arc::new(store)).await
        }
        StorageBackend::Memory => {
            let store = MemoryStore::with_ttl(config.summary_ttl());
            run_command(&cli, &config, Arc::clone(&node), Arc::new(store)).await
        }
    };

    match Arc::try_unwrap(node) {
        Ok(node) => {
            node.close().await;
            info!("Bitcoin connection closed");
        }
        Err(_) => warn!("Bitcoin connection still in use at shutdown"),
    }

    result
}

async fn run_command<S>(
    cli: &Cli,
    config: &AppConfig,
    node: Arc<NodeClient>,
    store: Arc<S>,
) -> Result<()>
where
    S: SummaryStore + TxLogStore + HistoryStore + 'static,
{
    let logger = MempoolLogger::new(node.clone(), store.clone());

    match &cli.command {
        Command::Compute { output } => {
            let started = Instant::now();

            // The mock node has no history, seed the log from its mempool
            if cli.test_mode {
                logger.poll_once().await?;
            }

            let estimator = config.estimator().context("Invalid estimation settings")?;
            let engine = SummaryEngine::new(node.clone(), store.clone(), config.engine_config());
            let run = EstimationRun::new(
                engine,
                node.clone(),
                store.clone(),
                store.clone(),
                estimator,
                config.estimation.flow_timespan_multiplier,
            );

            let result = run
                .execute(Utc::now().timestamp())
                .await
                .context("Estimation run failed")?;

            info!("Estimates by minute:\n{}", result.estimates.by_minute);

            match output.as_ref().or(config.output.path.as_ref()) {
                Some(path) => {
                    result
                        .write_to(path)
                        .with_context(|| format!("Failed to write estimates to {path}"))?;
                    info!("Estimates written to {}", path);
                }
                None => println!("{}", serde_json::to_string_pretty(&result)?),
            }

            info!("Processing time: {} seconds", started.elapsed().as_secs());
        }
        Command::LogMempool { once: true } => {
            logger.poll_once().await.context("Mempool poll failed")?;
        }
        Command::LogMempool { once: false } => {
            tokio::select! {
                _ = logger.run(config.poll_interval()) => {}
                _ = tokio::signal::ctrl_c() => info!("Received interrupt, shutting down"),
            }
        }
    }

    Ok(())
}
