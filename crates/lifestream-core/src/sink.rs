//! Destinations for decoded change records.

use tracing::{info, warn};

use crate::types::ChangeRecord;

/// Consumer of change records.
///
/// Records arrive in commit order. Handing a record to the sink is treated as
/// delivery: the replication loop acknowledges the record's WAL position right
/// after `deliver` returns.
pub trait Sink: Send {
    fn deliver(&mut self, record: ChangeRecord);
}

/// Collects records in memory.
impl Sink for Vec<ChangeRecord> {
    fn deliver(&mut self, record: ChangeRecord) {
        self.push(record);
    }
}

/// Emits every record as a structured log line.
#[derive(Debug, Default)]
pub struct LogSink {
    delivered: u64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records emitted so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}

impl Sink for LogSink {
    fn deliver(&mut self, record: ChangeRecord) {
        self.delivered += 1;

        match serde_json::to_string(&record) {
            Ok(row) => info!(
                target: "lifestream::sink",
                table = %record.qualified_table(),
                lsn = record.lsn,
                row = %row,
                "Change record"
            ),
            Err(e) => warn!(
                target: "lifestream::sink",
                table = %record.qualified_table(),
                lsn = record.lsn,
                error = %e,
                "Failed to serialize change record"
            ),
        }
    }
}
