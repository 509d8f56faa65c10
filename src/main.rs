use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use llmhost::cli::{Cli, Commands};
use llmhost::shutdown::{block_on_with_grace, RUNTIME_SHUTDOWN_GRACE};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llmhost=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    block_on_with_grace(run(cli), RUNTIME_SHUTDOWN_GRACE)?
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve(args) => {
            llmhost::cli::serve(args).await?;
        }
        Commands::List { verbose } => {
            llmhost::cli::list(verbose).await?;
        }
        Commands::Info { model, settings } => {
            llmhost::cli::info(model, settings).await?;
        }
    }

    Ok(())
}
