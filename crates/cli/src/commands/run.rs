//! Run command: wires brokers, persistence, and notifications into the router
//! and drives it until the kill switch is engaged.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::{info, warn};

use strikebot_core::config_loader::DEFAULT_CONFIG_PATH;
use strikebot_core::{Clock, ConfigLoader, SystemClock};
use strikebot_orchestrator::{
    build_brokers, notifier_from_config, ControlHandle, Router, Services, SqliteDatabase,
};

/// Arguments for the run command.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// Optional log file path (logs to file instead of stderr)
    #[arg(long)]
    pub log_file: Option<String>,
}

/// Runs every configured strategy until Ctrl-C.
///
/// # Errors
/// Returns an error if configuration, database setup, or a strategy fails fatally.
pub async fn run_bot(args: RunArgs) -> Result<()> {
    let config = ConfigLoader::load(&args.config)?;
    info!(
        config = %args.config,
        brokers = config.brokers.len(),
        strategies = config.strategies.len(),
        "Configuration loaded"
    );

    let clock = SystemClock::new();
    let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
    let brokers = build_brokers(&config.brokers, &shared_clock);

    let database = SqliteDatabase::connect(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to open strategy database")?;
    let notifier = notifier_from_config(&config.notifier)?;

    let services = Services {
        database: Arc::new(database),
        notifier: Arc::clone(&notifier),
        clock: shared_clock,
    };
    let (router, handle) = Router::build(config.bot, config.strategies, &brokers, services).await?;

    tokio::spawn(shutdown_on_ctrl_c(handle, clock));

    notifier.send_notification("strikebot: started").await;
    router.run().await
}

async fn shutdown_on_ctrl_c(handle: ControlHandle, clock: SystemClock) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        return;
    }
    info!("Ctrl-C received, engaging kill switch");
    if let Err(e) = handle.set_kill_switch(true).await {
        warn!(error = %e, "Router already stopped");
    }
    clock.interrupt();
}
