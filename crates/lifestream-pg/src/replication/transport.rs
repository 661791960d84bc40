//! The seam between the replication loop and the wire.

use std::future::Future;

use bytes::Bytes;

use crate::error::PgResult;

/// A message received on a streaming replication connection.
#[derive(Debug, Clone, PartialEq)]
pub enum WalMessage {
    /// A pgoutput payload ending at `wal_end`.
    Data { wal_end: u64, data: Bytes },
    /// Transaction start reported by the transport itself.
    Begin { xid: u32, commit_time_micros: i64 },
    /// Transaction end reported by the transport itself.
    Commit { end_lsn: u64 },
    KeepAlive { wal_end: u64, reply_requested: bool },
}

/// One open streaming session against a replication slot.
///
/// Dropping the session closes it.
pub trait ReplicationSession: Send {
    /// Position the server resumed streaming from.
    fn start_lsn(&self) -> u64;

    /// Wait for the next message. `None` means the server ended the stream.
    fn recv(&mut self) -> impl Future<Output = PgResult<Option<WalMessage>>> + Send;

    /// Report everything up to and including `lsn` as processed.
    fn acknowledge(&mut self, lsn: u64);
}

/// Something that can provision replication objects and open sessions.
pub trait ReplicationSource: Send {
    type Session: ReplicationSession;

    /// Ensure the publication and slot exist.
    fn provision(&mut self) -> impl Future<Output = PgResult<()>> + Send;

    /// Open a new streaming session, resuming at the slot's confirmed position.
    fn open_session(&mut self) -> impl Future<Output = PgResult<Self::Session>> + Send;
}
