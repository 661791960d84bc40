//! Demo row generator for the watched table.
//!
//! Inserts one `life_events` row per tick so a running consumer has
//! something to stream.

use std::time::Duration;

use chrono::Utc;
use rand::seq::SliceRandom;
use tokio::time::MissedTickBehavior;
use tokio_postgres::Client;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::PgResult;
use crate::replication::{quote_table_name, DEFAULT_TABLE};
use crate::shutdown::ShutdownRx;

/// Event names the generator picks from.
pub const LIFE_EVENTS: [&str; 4] = ["Born", "Married", "Divorced", "Died"];

/// Create the demo table if it does not exist yet.
pub async fn ensure_life_events_table(client: &Client, table: &str) -> PgResult<()> {
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id uuid PRIMARY KEY,
            name text NOT NULL,
            positive boolean NOT NULL,
            timestamp timestamptz NOT NULL DEFAULT now()
        )",
        quote_table_name(table)
    );
    client.batch_execute(&sql).await?;
    Ok(())
}

/// Insert a single row and return its id.
pub async fn insert_life_event(client: &Client, table: &str, name: &str) -> PgResult<Uuid> {
    let id = Uuid::new_v4();
    let sql = format!(
        "INSERT INTO {} (id, name, positive, timestamp) VALUES ($1, $2, $3, $4)",
        quote_table_name(table)
    );
    client
        .execute(&sql, &[&id, &name, &true, &Utc::now()])
        .await?;
    Ok(id)
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub table: String,
    pub interval: Duration,
    /// Stop after this many rows; `None` runs until shutdown.
    pub count: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
            interval: Duration::from_secs(1),
            count: None,
        }
    }
}

pub struct RowGenerator {
    client: Client,
    config: GeneratorConfig,
    shutdown: ShutdownRx,
}

impl RowGenerator {
    pub fn new(client: Client, config: GeneratorConfig, shutdown: ShutdownRx) -> Self {
        Self {
            client,
            config,
            shutdown,
        }
    }

    /// Insert rows until shutdown or the configured count. Returns rows inserted.
    pub async fn run(&mut self) -> PgResult<u64> {
        ensure_life_events_table(&self.client, &self.config.table).await?;

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut inserted = 0u64;

        info!(
            table = %self.config.table,
            interval_ms = self.config.interval.as_millis() as u64,
            "Generating rows"
        );

        while self.config.count.map_or(true, |limit| inserted < limit) {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let name = pick_event_name();
            let id = insert_life_event(&self.client, &self.config.table, name).await?;
            inserted += 1;
            debug!(%id, name, inserted, "Inserted row");
        }

        info!(inserted, "Generator stopped");
        Ok(inserted)
    }
}

fn pick_event_name() -> &'static str {
    LIFE_EVENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(LIFE_EVENTS[0])
}
