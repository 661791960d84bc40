use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "lifestream")]
#[command(about = "Stream inserts from a Postgres table using logical replication")]
#[command(version)]
pub struct Cli {
    /// Environment to load (loads .env.{ENV} instead of .env)
    #[arg(short, long, global = true)]
    pub env: Option<String>,

    /// Path to lifestream.toml (optional)
    #[arg(short, long, global = true, default_value = "lifestream.toml")]
    pub config: PathBuf,

    /// Postgres connection string (overrides config and DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Names of the replication objects, shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct ReplicationArgs {
    /// Replication slot name
    #[arg(long)]
    pub slot: Option<String>,

    /// Publication name for logical replication
    #[arg(long)]
    pub publication: Option<String>,

    /// Table to watch, as schema.table
    #[arg(long)]
    pub table: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Stream inserts from the watched table until interrupted
    Run {
        #[command(flatten)]
        replication: ReplicationArgs,

        /// Seconds to wait before reconnecting when the slot is busy
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        backoff_secs: Option<u64>,
    },

    /// Create the publication and replication slot if missing
    Setup {
        #[command(flatten)]
        replication: ReplicationArgs,
    },

    /// Show the state of the publication and replication slot
    Status {
        #[command(flatten)]
        replication: ReplicationArgs,
    },

    /// Insert demo life events into the watched table
    Generate {
        /// Table to insert into, as schema.table
        #[arg(long)]
        table: Option<String>,

        /// Milliseconds between inserts
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        interval_ms: Option<u64>,

        /// Stop after this many rows
        #[arg(long)]
        count: Option<u64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_flags_parse() {
        let cli = Cli::parse_from([
            "lifestream",
            "run",
            "--slot",
            "s1",
            "--table",
            "public.events",
            "--backoff-secs",
            "2",
        ]);
        match cli.command {
            Commands::Run {
                replication,
                backoff_secs,
            } => {
                assert_eq!(replication.slot.as_deref(), Some("s1"));
                assert_eq!(replication.publication, None);
                assert_eq!(replication.table.as_deref(), Some("public.events"));
                assert_eq!(backoff_secs, Some(2));
            }
            _ => panic!("expected run"),
        }
        assert_eq!(cli.config, PathBuf::from("lifestream.toml"));
    }

    #[test]
    fn test_zero_periods_rejected_by_flags() {
        assert!(Cli::try_parse_from(["lifestream", "run", "--backoff-secs", "0"]).is_err());
        assert!(Cli::try_parse_from(["lifestream", "generate", "--interval-ms", "0"]).is_err());
        assert!(Cli::try_parse_from(["lifestream", "generate", "--interval-ms", "1"]).is_ok());
    }
}
