use anyhow::{Context, Result};
use colored::Colorize;
use lifestream_pg::connect_postgres;
use lifestream_pg::replication::{
    check_replication_setup, PublicationStatus, SlotStatus, OUTPUT_PLUGIN,
};

use crate::config::Settings;

pub async fn cmd_status(settings: Settings) -> Result<()> {
    let client = connect_postgres(&settings.connection_string)
        .await
        .context("Failed to connect to Postgres")?;

    let status = check_replication_setup(
        &client,
        &settings.slot,
        &settings.publication,
        OUTPUT_PLUGIN,
    )
    .await
    .context("Failed to inspect replication setup")?;

    println!("\nReplication Status:");
    println!("{:-<60}", "");

    match &status.slot {
        SlotStatus::Ready {
            active,
            confirmed_lsn,
        } => {
            println!("  Slot {:<24} {}", settings.slot, "present".green());
            println!("    plugin:         {}", OUTPUT_PLUGIN);
            println!(
                "    active:         {}",
                if *active { "yes".yellow() } else { "no".normal() }
            );
            println!(
                "    confirmed LSN:  {}",
                confirmed_lsn.as_deref().unwrap_or("-")
            );
        }
        SlotStatus::WrongPlugin { plugin } => {
            println!(
                "  Slot {:<24} {}",
                settings.slot,
                format!(
                    "uses plugin {}, expected {}",
                    plugin.as_deref().unwrap_or("<none>"),
                    OUTPUT_PLUGIN
                )
                .red()
            );
        }
        SlotStatus::Missing => {
            println!("  Slot {:<24} {}", settings.slot, "missing".red());
        }
    }

    match &status.publication {
        PublicationStatus::Exists { tables } => {
            println!(
                "  Publication {:<17} {}",
                settings.publication,
                "present".green()
            );
            if tables.is_empty() {
                println!("    tables:         (none)");
            }
            for table in tables {
                println!("    table:          {}", table);
            }
        }
        PublicationStatus::Missing => {
            println!(
                "  Publication {:<17} {}",
                settings.publication,
                "missing".red()
            );
        }
    }

    println!();
    if !status.is_ready() {
        println!("Run 'lifestream setup' to create the missing objects.\n");
    }

    Ok(())
}
