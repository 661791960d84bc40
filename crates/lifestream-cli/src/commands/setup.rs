use anyhow::{Context, Result};
use colored::Colorize;
use lifestream_pg::replication::ReplicationSource;
use lifestream_pg::PgReplicationSource;

use crate::config::Settings;

pub async fn cmd_setup(settings: Settings) -> Result<()> {
    println!("Setting up logical replication...\n");
    println!("  Publication: {} (for {})", settings.publication, settings.table);
    println!("  Slot:        {} (pgoutput)", settings.slot);
    println!();

    let mut source = PgReplicationSource::new(settings.stream_config());
    source
        .provision()
        .await
        .context("Failed to provision publication and replication slot")?;

    println!("{}", "Replication objects are ready.".green());
    println!("\nNext steps:");
    println!("  1. Run: lifestream run");
    println!("  2. In another terminal: lifestream generate\n");

    Ok(())
}
