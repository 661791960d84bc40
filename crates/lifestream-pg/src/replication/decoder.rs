//! Turns raw pgoutput payloads into change records.

use std::fmt;

use lifestream_core::{ChangeRecord, Column, Value};
use tracing::debug;

use super::pgoutput::{parse_message, InsertBody, RawMessage, TupleValue};
use super::relation_cache::RelationCache;

/// Result of decoding one replication message.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedEvent {
    RowInsert(ChangeRecord),
    Begin { xid: u32 },
    Commit { end_lsn: u64 },
    /// A relation schema was (re)declared.
    Relation { relation_id: u32, columns: usize },
    /// A recognised message this consumer ignores.
    Other(u8),
    /// A message tag the parser does not know.
    Unknown(u8),
    /// The message could not be turned into an event.
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    Malformed(String),
    UnknownRelation(u32),
    ColumnCountMismatch {
        relation_id: u32,
        expected: usize,
        found: usize,
    },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Malformed(msg) => write!(f, "malformed message: {msg}"),
            SkipReason::UnknownRelation(id) => {
                write!(f, "insert for relation {id} before its Relation message")
            }
            SkipReason::ColumnCountMismatch {
                relation_id,
                expected,
                found,
            } => write!(
                f,
                "relation {relation_id} has {expected} columns but tuple has {found}"
            ),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TxnContext {
    xid: u32,
    commit_time: i64,
}

/// Session-scoped decoder: relation schemas plus the open transaction.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    relations: RelationCache,
    txn: Option<TxnContext>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn relations(&self) -> &RelationCache {
        &self.relations
    }

    /// Decode one XLogData payload received at `lsn`.
    pub fn decode(&mut self, data: &[u8], lsn: u64) -> DecodedEvent {
        let message = match parse_message(data) {
            Ok(m) => m,
            Err(e) => return DecodedEvent::Skipped(SkipReason::Malformed(e.to_string())),
        };

        match message {
            RawMessage::Begin(begin) => {
                self.begin_transaction(begin.xid, begin.commit_time);
                DecodedEvent::Begin { xid: begin.xid }
            }
            RawMessage::Commit(commit) => {
                self.end_transaction();
                DecodedEvent::Commit {
                    end_lsn: commit.end_lsn,
                }
            }
            RawMessage::Relation(rel) => {
                if self.relations.apply(&rel) {
                    debug!(
                        relation_id = rel.relation_id,
                        table = %format!("{}.{}", rel.namespace, rel.name),
                        columns = rel.columns.len(),
                        "Relation schema updated"
                    );
                }
                DecodedEvent::Relation {
                    relation_id: rel.relation_id,
                    columns: rel.columns.len(),
                }
            }
            RawMessage::Insert(insert) => self.decode_insert(insert, lsn),
            RawMessage::Update { .. } => DecodedEvent::Other(b'U'),
            RawMessage::Delete { .. } => DecodedEvent::Other(b'D'),
            RawMessage::Other(tag) => DecodedEvent::Other(tag),
            RawMessage::Unknown(tag) => DecodedEvent::Unknown(tag),
        }
    }

    /// Open a transaction context for the following inserts.
    ///
    /// `commit_time` is in microseconds since 2000-01-01 UTC.
    pub fn begin_transaction(&mut self, xid: u32, commit_time: i64) {
        self.txn = Some(TxnContext { xid, commit_time });
    }

    pub fn end_transaction(&mut self) {
        self.txn = None;
    }

    fn decode_insert(&self, insert: InsertBody, lsn: u64) -> DecodedEvent {
        let Some(schema) = self.relations.get(insert.relation_id) else {
            return DecodedEvent::Skipped(SkipReason::UnknownRelation(insert.relation_id));
        };

        if schema.columns.len() != insert.values.len() {
            return DecodedEvent::Skipped(SkipReason::ColumnCountMismatch {
                relation_id: insert.relation_id,
                expected: schema.columns.len(),
                found: insert.values.len(),
            });
        }

        let columns = schema
            .columns
            .iter()
            .zip(insert.values)
            .map(|(col, raw)| {
                let value = match raw {
                    TupleValue::Null => Value::Null,
                    TupleValue::Unchanged => Value::Unchanged,
                    TupleValue::Text(s) => typed_value(&s, col.type_oid),
                    TupleValue::Binary(b) => Value::Bytes(b),
                };
                Column::new(col.name.clone(), value)
            })
            .collect();

        DecodedEvent::RowInsert(ChangeRecord {
            relation_id: insert.relation_id,
            schema: schema.namespace.clone(),
            table: schema.name.clone(),
            columns,
            lsn,
            xid: self.txn.map(|t| t.xid),
            committed_at: self.txn.map(|t| format_pg_timestamp(t.commit_time)),
        })
    }
}

/// Type a text-format value by its PostgreSQL type OID.
fn typed_value(s: &str, type_oid: u32) -> Value {
    let fallback = || Value::String(s.to_string());
    match type_oid {
        // bool
        16 => match s {
            "t" | "true" => Value::Bool(true),
            "f" | "false" => Value::Bool(false),
            _ => fallback(),
        },
        // int2, int4, int8
        20 | 21 | 23 => s.parse().map(Value::Int).unwrap_or_else(|_| fallback()),
        // float4, float8, numeric
        700 | 701 | 1700 => s.parse().map(Value::Float).unwrap_or_else(|_| fallback()),
        // json, jsonb
        114 | 3802 => serde_json::from_str(s)
            .map(Value::Json)
            .unwrap_or_else(|_| fallback()),
        // text, varchar, uuid, date, timestamp, timestamptz and the rest
        _ => fallback(),
    }
}

/// Format a PostgreSQL timestamp (microseconds since 2000-01-01) as RFC 3339.
fn format_pg_timestamp(micros: i64) -> String {
    const PG_EPOCH_OFFSET_SECS: i64 = 946_684_800;

    let secs = micros.div_euclid(1_000_000) + PG_EPOCH_OFFSET_SECS;
    let nanos = (micros.rem_euclid(1_000_000) * 1000) as u32;

    chrono::DateTime::from_timestamp(secs, nanos)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string())
        .unwrap_or_else(|| format!("{micros}us"))
}
