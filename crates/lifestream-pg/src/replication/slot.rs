//! Replication slot provisioning and inspection.
//!
//! Slots are created when missing and never dropped here: the slot holds the
//! confirmed position that lets a restarted consumer resume without loss.

use tokio_postgres::Client;
use tracing::{debug, info};

use crate::error::{PgError, PgResult};

/// Catalog view of a replication slot.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotInfo {
    pub plugin: Option<String>,
    pub active: bool,
    pub confirmed_flush_lsn: Option<String>,
}

/// Look up a slot in `pg_replication_slots`.
pub async fn slot_info(client: &Client, slot_name: &str) -> PgResult<Option<SlotInfo>> {
    let row = client
        .query_opt(
            "SELECT plugin, active, confirmed_flush_lsn::text FROM pg_replication_slots WHERE slot_name = $1",
            &[&slot_name],
        )
        .await?;

    Ok(row.map(|r| SlotInfo {
        plugin: r.get(0),
        active: r.get(1),
        confirmed_flush_lsn: r.get(2),
    }))
}

/// Get the confirmed_flush_lsn for a slot.
pub async fn confirmed_flush_lsn(client: &Client, slot_name: &str) -> PgResult<Option<String>> {
    Ok(slot_info(client, slot_name)
        .await?
        .and_then(|info| info.confirmed_flush_lsn))
}

/// Make sure a logical slot named `slot_name` exists with output `plugin`.
///
/// The existence check and the create run in one transaction. A slot that
/// exists with a different plugin is an error rather than being replaced.
/// Returns true if this call created the slot.
pub async fn ensure_slot(client: &mut Client, slot_name: &str, plugin: &str) -> PgResult<bool> {
    let txn = client.transaction().await?;

    let existing = txn
        .query_opt(
            "SELECT plugin FROM pg_replication_slots WHERE slot_name = $1",
            &[&slot_name],
        )
        .await?;

    if let Some(row) = existing {
        let found: Option<String> = row.get(0);
        txn.commit().await?;

        if found.as_deref() != Some(plugin) {
            return Err(PgError::SlotPluginMismatch {
                slot: slot_name.to_string(),
                expected: plugin.to_string(),
                found,
            });
        }
        debug!(slot = %slot_name, "Replication slot already exists");
        return Ok(false);
    }

    info!(slot = %slot_name, plugin = %plugin, "Creating replication slot");
    let created = txn
        .execute(
            "SELECT pg_create_logical_replication_slot($1, $2)",
            &[&slot_name, &plugin],
        )
        .await;

    match created {
        Ok(_) => {
            txn.commit().await?;
            Ok(true)
        }
        Err(e) => {
            let err = PgError::from(e);
            if err.is_duplicate_object() {
                info!(slot = %slot_name, "Replication slot created concurrently");
                Ok(false)
            } else {
                Err(PgError::SlotCreationFailed(err.to_string()))
            }
        }
    }
}
