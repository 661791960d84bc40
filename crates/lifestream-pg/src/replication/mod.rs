//! Streaming logical replication over the pgoutput plugin.
//!
//! Provisioning and slot inspection use a regular connection; rows arrive on
//! a dedicated replication connection and are decoded here into
//! [`ChangeRecord`](lifestream_core::ChangeRecord)s.

pub mod client;
pub mod decoder;
pub mod lsn;
pub mod pgoutput;
pub mod publication;
pub mod relation_cache;
pub mod slot;
pub mod status;
pub mod stream_loop;
pub mod tracker;
pub mod transport;

/// Replication slot used when none is configured.
pub const DEFAULT_SLOT: &str = "lifestream_slot";

/// Publication used when none is configured.
pub const DEFAULT_PUBLICATION: &str = "lifestream_pub";

/// Table watched when none is configured.
pub const DEFAULT_TABLE: &str = "public.life_events";

/// Logical decoding output plugin the slot must use.
pub const OUTPUT_PLUGIN: &str = "pgoutput";

pub use client::{PgReplicationSource, PgwireSession, ReplicationStreamConfig};
pub use decoder::{DecodedEvent, SkipReason, StreamDecoder};
pub use lsn::{format_lsn, parse_lsn};
pub use publication::{ensure_publication, quote_ident, quote_table_name};
pub use relation_cache::{RelationCache, RelationSchema};
pub use slot::{confirmed_flush_lsn, ensure_slot, slot_info, SlotInfo};
pub use status::{check_replication_setup, PublicationStatus, ReplicationStatus, SlotStatus};
pub use stream_loop::{LoopConfig, LoopStats, ReplicationLoop, DEFAULT_BACKOFF};
pub use tracker::PositionTracker;
pub use transport::{ReplicationSession, ReplicationSource, WalMessage};
