use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use triad::config::Config;
use triad::context::AppContext;
use triad::error::Result;

#[derive(Parser)]
#[command(name = "triad")]
#[command(about = "Multi-backend ticket synchronization core")]
#[command(version)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "triad.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot the full component graph, run the fail-fast mapping checks, and
    /// print a health report per family
    Check,

    /// List the active tickets of one family
    List {
        /// Family name from the configuration (e.g. "chamados")
        family: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config)?;
    let context = AppContext::init(config).await?;

    match cli.command {
        Commands::Check => {
            for (name, service) in context.families() {
                let health = service.health().await;
                println!(
                    "{}: {}",
                    name,
                    serde_json::to_string_pretty(&health)?
                );
            }
        }
        Commands::List { family } => {
            let service = context.service(&family).ok_or_else(|| {
                triad::error::Error::Config(format!("unknown family '{}'", family))
            })?;
            match service.list().await {
                Ok(tickets) => println!("{}", serde_json::to_string_pretty(&tickets)?),
                Err(e) => eprintln!("{}", serde_json::to_string_pretty(&e.to_json())?),
            }
        }
    }

    context.shutdown().await;
    Ok(())
}
