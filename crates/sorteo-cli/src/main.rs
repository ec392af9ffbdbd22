use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;
mod engine;

#[derive(Parser)]
#[command(name = "sorteo")]
#[command(about = "Sorteo wallet session and balance engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect the wallet and persist a session
    Connect {
        /// Persona to sign in as (simulated provider only)
        #[arg(long)]
        persona: Option<String>,
    },
    /// Show the current connection and session
    Status,
    /// Show the connected wallet's balance
    Balance {
        /// Keep polling and print each refresh
        #[arg(long)]
        watch: bool,
    },
    /// List the built-in personas
    Personas,
    /// Disconnect and clear the stored session
    Disconnect,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Connect { persona } => commands::connect::run(persona).await,
        Commands::Status => commands::status::run().await,
        Commands::Balance { watch } => commands::balance::run(watch).await,
        Commands::Personas => commands::personas::run(),
        Commands::Disconnect => commands::disconnect::run().await,
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
