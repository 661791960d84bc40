//! The replication loop: provision, connect, stream, recover, stop.
//!
//! ```text
//! Provisioning -> Connecting -> Streaming -> Stopped
//!                     ^             |
//!                     |             v
//!                     +------- Recovering
//! ```
//!
//! Only a busy slot (another session streaming it) or the server ending the
//! stream leads to `Recovering`. Every other error is returned to the caller.
//! A shutdown request moves any waiting state straight to `Stopped`.

use std::fmt;
use std::time::Duration;

use lifestream_core::Sink;
use tracing::{debug, info, warn};

use super::decoder::{DecodedEvent, StreamDecoder};
use super::lsn::format_lsn;
use super::tracker::PositionTracker;
use super::transport::{ReplicationSession, ReplicationSource, WalMessage};
use crate::error::{PgError, PgResult};
use crate::shutdown::ShutdownRx;

/// Default wait before reconnecting after a recoverable fault.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub backoff: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            backoff: DEFAULT_BACKOFF,
        }
    }
}

/// Counters reported when the loop stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    pub sessions: u64,
    pub delivered: u64,
    pub skipped: u64,
    pub reconnects: u64,
    pub last_acknowledged: u64,
}

enum LoopState<S> {
    Provisioning,
    Connecting,
    Streaming(S),
    Recovering(RecoveryCause),
    Stopped,
}

enum RecoveryCause {
    SlotInUse(String),
    StreamEnded,
}

impl fmt::Display for RecoveryCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryCause::SlotInUse(detail) => write!(f, "replication slot busy: {detail}"),
            RecoveryCause::StreamEnded => f.write_str("server ended the stream"),
        }
    }
}

/// Transition guard: only a busy slot is retried.
fn recoverable(err: PgError) -> PgResult<RecoveryCause> {
    match err {
        PgError::SlotInUse { detail, .. } => Ok(RecoveryCause::SlotInUse(detail)),
        other => Err(other),
    }
}

/// How a streaming session finished without an unrecoverable error.
enum SessionEnd {
    Cancelled,
    Recover(RecoveryCause),
}

/// Drives one replication source into one sink until shut down.
pub struct ReplicationLoop<R, K> {
    source: R,
    sink: K,
    config: LoopConfig,
    shutdown: ShutdownRx,
    stats: LoopStats,
}

impl<R, K> ReplicationLoop<R, K>
where
    R: ReplicationSource,
    K: Sink,
{
    pub fn new(source: R, sink: K, config: LoopConfig, shutdown: ShutdownRx) -> Self {
        Self {
            source,
            sink,
            config,
            shutdown,
            stats: LoopStats::default(),
        }
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    /// Run until shutdown. Returns the final counters, or the first error
    /// that is not a recognised transient fault.
    pub async fn run(&mut self) -> PgResult<LoopStats> {
        let mut state = LoopState::Provisioning;

        loop {
            state = match state {
                LoopState::Provisioning => {
                    tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => LoopState::Stopped,
                        provisioned = self.source.provision() => {
                            provisioned?;
                            LoopState::Connecting
                        }
                    }
                }
                LoopState::Connecting => {
                    let opened = tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => None,
                        opened = self.source.open_session() => Some(opened),
                    };

                    match opened {
                        None => LoopState::Stopped,
                        Some(Ok(session)) => {
                            self.stats.sessions += 1;
                            LoopState::Streaming(session)
                        }
                        Some(Err(e)) => LoopState::Recovering(recoverable(e)?),
                    }
                }
                LoopState::Streaming(session) => match self.stream(session).await? {
                    SessionEnd::Cancelled => LoopState::Stopped,
                    SessionEnd::Recover(cause) => LoopState::Recovering(cause),
                },
                LoopState::Recovering(cause) => {
                    warn!(
                        cause = %cause,
                        backoff_ms = self.config.backoff.as_millis() as u64,
                        "Replication interrupted, retrying after backoff"
                    );

                    tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => LoopState::Stopped,
                        _ = tokio::time::sleep(self.config.backoff) => {
                            self.stats.reconnects += 1;
                            LoopState::Connecting
                        }
                    }
                }
                LoopState::Stopped => {
                    info!(
                        delivered = self.stats.delivered,
                        skipped = self.stats.skipped,
                        reconnects = self.stats.reconnects,
                        last_acknowledged = %format_lsn(self.stats.last_acknowledged),
                        "Replication loop stopped"
                    );
                    return Ok(self.stats);
                }
            };
        }
    }

    /// Consume one session. The session is dropped (closed) on return.
    async fn stream(&mut self, mut session: R::Session) -> PgResult<SessionEnd> {
        let mut decoder = StreamDecoder::new();
        let mut tracker = PositionTracker::new(session.start_lsn());

        info!(start_lsn = %format_lsn(tracker.acknowledged()), "Streaming changes");

        loop {
            let received = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(SessionEnd::Cancelled),
                received = session.recv() => received,
            };

            let message = match received {
                Ok(Some(message)) => message,
                Ok(None) => return Ok(SessionEnd::Recover(RecoveryCause::StreamEnded)),
                Err(e) => return Ok(SessionEnd::Recover(recoverable(e)?)),
            };

            let processed = match message {
                WalMessage::Data { wal_end, data } => {
                    self.handle_event(decoder.decode(&data, wal_end));
                    Some(wal_end)
                }
                WalMessage::Begin {
                    xid,
                    commit_time_micros,
                } => {
                    decoder.begin_transaction(xid, commit_time_micros);
                    None
                }
                WalMessage::Commit { end_lsn } => {
                    decoder.end_transaction();
                    Some(end_lsn)
                }
                WalMessage::KeepAlive {
                    wal_end,
                    reply_requested,
                } => {
                    debug!(wal_end = %format_lsn(wal_end), reply_requested, "Keepalive");
                    None
                }
            };

            // Delivery to the sink happened above; only now may the position be acknowledged
            if let Some(lsn) = processed.and_then(|lsn| tracker.advance(lsn)) {
                session.acknowledge(lsn);
                self.stats.last_acknowledged = lsn;
            }
        }
    }

    fn handle_event(&mut self, event: DecodedEvent) {
        match event {
            DecodedEvent::RowInsert(record) => {
                self.sink.deliver(record);
                self.stats.delivered += 1;
            }
            DecodedEvent::Skipped(reason) => {
                self.stats.skipped += 1;
                warn!(reason = %reason, skipped = self.stats.skipped, "Skipping undecodable message");
            }
            DecodedEvent::Unknown(tag) => {
                debug!(tag = %(tag as char), "Ignoring unknown message type");
            }
            DecodedEvent::Begin { xid } => debug!(xid, "Transaction begin"),
            DecodedEvent::Commit { end_lsn } => {
                debug!(end_lsn = %format_lsn(end_lsn), "Transaction commit")
            }
            DecodedEvent::Relation {
                relation_id,
                columns,
            } => debug!(relation_id, columns, "Relation message"),
            DecodedEvent::Other(tag) => debug!(tag = %(tag as char), "Ignoring message"),
        }
    }
}
