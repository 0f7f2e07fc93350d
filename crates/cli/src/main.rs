use clap::{Parser, Subcommand};

mod commands;

use commands::{CheckConfigArgs, RunArgs, SessionArgs};

#[derive(Parser)]
#[command(name = "strikebot")]
#[command(about = "Rule-based options trading bot", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configured strategy until Ctrl-C
    Run(RunArgs),
    /// Load and validate the configuration, then print a summary
    CheckConfig(CheckConfigArgs),
    /// Show the current market-session phase for each configured broker
    Session(SessionArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run(RunArgs {
            log_file: Some(path),
            ..
        }) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
                )
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
                )
                .init();
        }
    }

    match cli.command {
        Commands::Run(args) => commands::run_bot(args).await?,
        Commands::CheckConfig(args) => commands::run_check_config(&args)?,
        Commands::Session(args) => commands::run_session(args).await?,
    }

    Ok(())
}
