//! Read-only view of the server-side replication objects.

use tokio_postgres::Client;

use super::publication::{publication_exists, publication_tables};
use super::slot::slot_info;
use crate::error::PgResult;

/// State of the replication slot.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotStatus {
    Ready {
        active: bool,
        confirmed_lsn: Option<String>,
    },
    WrongPlugin {
        plugin: Option<String>,
    },
    Missing,
}

impl SlotStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, SlotStatus::Ready { .. })
    }
}

/// State of the publication.
#[derive(Debug, Clone, PartialEq)]
pub enum PublicationStatus {
    Exists { tables: Vec<String> },
    Missing,
}

impl PublicationStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, PublicationStatus::Exists { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationStatus {
    pub slot: SlotStatus,
    pub publication: PublicationStatus,
}

impl ReplicationStatus {
    /// Whether streaming could start without provisioning.
    pub fn is_ready(&self) -> bool {
        self.slot.is_ready() && self.publication.is_ready()
    }
}

/// Inspect the slot and publication without changing anything.
pub async fn check_replication_setup(
    client: &Client,
    slot_name: &str,
    publication_name: &str,
    plugin: &str,
) -> PgResult<ReplicationStatus> {
    let slot = match slot_info(client, slot_name).await? {
        Some(info) if info.plugin.as_deref() == Some(plugin) => SlotStatus::Ready {
            active: info.active,
            confirmed_lsn: info.confirmed_flush_lsn,
        },
        Some(info) => SlotStatus::WrongPlugin {
            plugin: info.plugin,
        },
        None => SlotStatus::Missing,
    };

    let publication = if publication_exists(client, publication_name).await? {
        PublicationStatus::Exists {
            tables: publication_tables(client, publication_name).await?,
        }
    } else {
        PublicationStatus::Missing
    };

    Ok(ReplicationStatus { slot, publication })
}
