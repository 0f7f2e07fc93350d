//! Session command.
//!
//! Asks each configured broker for today's market hours and prints the phase
//! the strategies trading through it would see right now.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;

use strikebot_core::config_loader::DEFAULT_CONFIG_PATH;
use strikebot_core::{Clock, ConfigLoader, SystemClock};
use strikebot_engine::MarketSessionClock;
use strikebot_orchestrator::build_brokers;

/// Arguments for the session command.
#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,
}

/// Prints the session phase and next open for every configured broker.
///
/// # Errors
/// Returns an error if the configuration is invalid or no session is found
/// within the lookahead window.
pub async fn run_session(args: SessionArgs) -> Result<()> {
    let config = ConfigLoader::load(&args.config)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let now = clock.now();

    for (name, broker) in build_brokers(&config.brokers, &clock) {
        let sessions = MarketSessionClock::new(broker, &config.bot);
        println!("{}", describe(&name, &sessions, now).await?);
    }
    Ok(())
}

async fn describe(name: &str, sessions: &MarketSessionClock, now: DateTime<Utc>) -> Result<String> {
    let today = sessions.exchange_date(now);
    let Some(hours) = sessions.session_for(today).await else {
        return Ok(format!("{name}: market hours unavailable"));
    };
    let phase = sessions.current_phase(now, hours.session.as_ref());
    let upcoming = sessions
        .upcoming_session(now, today)
        .await
        .with_context(|| format!("Broker {name} reported no upcoming session"))?;
    let next = upcoming.map_or_else(
        || "unknown".to_string(),
        |s| format!("{} - {}", s.open, s.close),
    );
    Ok(format!("{name}: {today} {phase}, session {next}"))
}
