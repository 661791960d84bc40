use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use lifestream_pg::{connect_postgres, create_shutdown, GeneratorConfig, RowGenerator};

use super::spawn_signal_listener;
use crate::config::Settings;

pub async fn cmd_generate(
    settings: Settings,
    interval_ms: Option<u64>,
    count: Option<u64>,
) -> Result<()> {
    let client = connect_postgres(&settings.connection_string)
        .await
        .context("Failed to connect to Postgres")?;

    let config = GeneratorConfig {
        table: settings.table.clone(),
        interval: interval_ms
            .map(Duration::from_millis)
            .unwrap_or(settings.generator_interval),
        count,
    };

    let (shutdown_tx, shutdown_rx) = create_shutdown();
    let signals = spawn_signal_listener(shutdown_tx);

    let result = RowGenerator::new(client, config, shutdown_rx).run().await;
    signals.abort();
    let _ = signals.await;

    let inserted = result.context("Row generator failed")?;
    println!(
        "{}",
        format!("Inserted {} row(s) into {}.", inserted, settings.table).green()
    );
    Ok(())
}
