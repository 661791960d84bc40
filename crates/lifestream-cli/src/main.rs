use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod config;
mod env;

use cli::{Cli, Commands, ReplicationArgs};
use config::{FileConfig, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lifestream=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    env::load_dotenv_from_ancestors(cli.env.as_deref())?;
    let file = FileConfig::load(&cli.config)?;

    match cli.command {
        Commands::Run {
            replication,
            backoff_secs,
        } => {
            let mut settings = Settings::resolve(file, cli.database_url, &replication)?;
            if let Some(secs) = backoff_secs {
                settings.backoff = std::time::Duration::from_secs(secs);
            }
            commands::cmd_run(settings).await
        }
        Commands::Setup { replication } => {
            commands::cmd_setup(Settings::resolve(file, cli.database_url, &replication)?).await
        }
        Commands::Status { replication } => {
            commands::cmd_status(Settings::resolve(file, cli.database_url, &replication)?).await
        }
        Commands::Generate {
            table,
            interval_ms,
            count,
        } => {
            let args = ReplicationArgs {
                table,
                ..Default::default()
            };
            let settings = Settings::resolve(file, cli.database_url, &args)?;
            commands::cmd_generate(settings, interval_ms, count).await
        }
    }
}
