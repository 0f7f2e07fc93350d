//! Check-config command.

use anyhow::Result;
use clap::Args;

use strikebot_core::config_loader::DEFAULT_CONFIG_PATH;
use strikebot_core::{AppConfig, BrokerSettings, ConfigLoader, NotifierConfig};

/// Arguments for the check-config command.
#[derive(Args, Debug, Clone)]
pub struct CheckConfigArgs {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,
}

/// Loads and validates the configuration, then prints what would run.
///
/// # Errors
/// Returns an error if the configuration cannot be loaded or is invalid.
pub fn run_check_config(args: &CheckConfigArgs) -> Result<()> {
    let config = ConfigLoader::load(&args.config)?;
    println!("{}", summarize(&config));
    Ok(())
}

fn summarize(config: &AppConfig) -> String {
    let mut lines = vec![
        format!(
            "loop every {}s, timezone {}, database {}",
            config.bot.loop_frequency_secs, config.bot.market_timezone, config.database.url
        ),
        match &config.notifier {
            NotifierConfig::Log => "notifications: log".to_string(),
            NotifierConfig::Webhook { url, .. } => format!("notifications: webhook {url}"),
        },
    ];
    for broker in &config.brokers {
        let BrokerSettings::Paper(paper) = &broker.settings;
        lines.push(format!(
            "broker {}: paper, cash {}, {} underlyings",
            broker.name,
            paper.starting_cash,
            paper.underlyings.len()
        ));
    }
    for strategy in &config.strategies {
        lines.push(format!(
            "strategy {}: {:?} {} {:?} via {}, delta [{}, {}], dte [{}, {}]",
            strategy.name,
            strategy.kind,
            strategy.underlying,
            strategy.put_or_call,
            strategy.broker,
            strategy.min_delta,
            strategy.target_delta,
            strategy.min_dte,
            strategy.max_dte
        ));
    }
    lines.join("\n")
}
