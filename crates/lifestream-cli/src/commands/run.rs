use anyhow::{Context, Result};
use colored::Colorize;
use lifestream_core::LogSink;
use lifestream_pg::{create_shutdown, format_lsn, PgReplicationSource, ReplicationLoop};
use tracing::info;

use super::spawn_signal_listener;
use crate::config::Settings;

pub async fn cmd_run(settings: Settings) -> Result<()> {
    info!(
        slot = %settings.slot,
        publication = %settings.publication,
        table = %settings.table,
        "Starting lifestream"
    );

    let (shutdown_tx, shutdown_rx) = create_shutdown();
    let source = PgReplicationSource::new(settings.stream_config());
    let mut replication =
        ReplicationLoop::new(source, LogSink::new(), settings.loop_config(), shutdown_rx);

    let signals = spawn_signal_listener(shutdown_tx);
    let result = replication.run().await;

    // The loop may have failed before any signal arrived
    signals.abort();
    let _ = signals.await;

    let stats = result.context("Replication stopped with an error")?;

    println!("\n{}", "Replication stopped.".green());
    println!("  Records delivered:  {}", stats.delivered);
    println!("  Messages skipped:   {}", stats.skipped);
    println!("  Reconnects:         {}", stats.reconnects);
    println!(
        "  Last acknowledged:  {}",
        format_lsn(stats.last_acknowledged)
    );

    Ok(())
}
