//! Parser for the pgoutput logical replication message format.
//!
//! Reference: https://www.postgresql.org/docs/current/protocol-logicalrep-message-formats.html
//!
//! Only Relation and Insert bodies are parsed in full. Begin and Commit carry
//! the transaction context; everything else is identified by tag and skipped.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};

use crate::error::{PgError, PgResult};

/// One pgoutput message, as received inside an XLogData payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RawMessage {
    Begin(BeginBody),
    Commit(CommitBody),
    Relation(RelationBody),
    Insert(InsertBody),
    Update { relation_id: u32 },
    Delete { relation_id: u32 },
    /// A known message kind this consumer has no use for (type, origin,
    /// truncate, logical message, streaming markers).
    Other(u8),
    /// A tag this parser does not know.
    Unknown(u8),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BeginBody {
    pub final_lsn: u64,
    /// Microseconds since 2000-01-01 UTC.
    pub commit_time: i64,
    pub xid: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitBody {
    pub commit_lsn: u64,
    pub end_lsn: u64,
    pub commit_time: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationBody {
    pub relation_id: u32,
    pub namespace: String,
    pub name: String,
    pub replica_identity: u8,
    pub columns: Vec<RelationColumn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationColumn {
    /// Bit 0 set when the column is part of the replica identity key.
    pub flags: u8,
    pub name: String,
    pub type_oid: u32,
    pub type_modifier: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertBody {
    pub relation_id: u32,
    pub values: Vec<TupleValue>,
}

/// A positional tuple value.
#[derive(Debug, Clone, PartialEq)]
pub enum TupleValue {
    Null,
    /// Unchanged TOASTed value, not sent by the server.
    Unchanged,
    Text(String),
    Binary(Vec<u8>),
}

/// Parse a single pgoutput message.
pub fn parse_message(data: &[u8]) -> PgResult<RawMessage> {
    let (&tag, body) = data
        .split_first()
        .ok_or_else(|| PgError::PgOutput("empty message".into()))?;
    let mut cur = Cursor::new(body);

    let message = match tag {
        b'B' => RawMessage::Begin(BeginBody {
            final_lsn: cur.read_u64::<BigEndian>()?,
            commit_time: cur.read_i64::<BigEndian>()?,
            xid: cur.read_u32::<BigEndian>()?,
        }),
        b'C' => {
            let _flags = cur.read_u8()?;
            RawMessage::Commit(CommitBody {
                commit_lsn: cur.read_u64::<BigEndian>()?,
                end_lsn: cur.read_u64::<BigEndian>()?,
                commit_time: cur.read_i64::<BigEndian>()?,
            })
        }
        b'R' => RawMessage::Relation(parse_relation(&mut cur)?),
        b'I' => {
            let relation_id = cur.read_u32::<BigEndian>()?;
            expect_marker(&mut cur, b'N', "insert")?;
            RawMessage::Insert(InsertBody {
                relation_id,
                values: parse_tuple(&mut cur)?,
            })
        }
        b'U' => RawMessage::Update {
            relation_id: cur.read_u32::<BigEndian>()?,
        },
        b'D' => RawMessage::Delete {
            relation_id: cur.read_u32::<BigEndian>()?,
        },
        // Type, Origin, Truncate, logical Message, stream start/stop/commit/abort
        b'Y' | b'O' | b'T' | b'M' | b'S' | b'E' | b'c' | b'A' => RawMessage::Other(tag),
        other => RawMessage::Unknown(other),
    };

    Ok(message)
}

fn parse_relation(cur: &mut Cursor<&[u8]>) -> PgResult<RelationBody> {
    let relation_id = cur.read_u32::<BigEndian>()?;
    let namespace = read_cstr(cur)?;
    let name = read_cstr(cur)?;
    let replica_identity = cur.read_u8()?;
    let count = read_count(cur)?;

    let mut columns = Vec::with_capacity(count);
    for _ in 0..count {
        columns.push(RelationColumn {
            flags: cur.read_u8()?,
            name: read_cstr(cur)?,
            type_oid: cur.read_u32::<BigEndian>()?,
            type_modifier: cur.read_i32::<BigEndian>()?,
        });
    }

    Ok(RelationBody {
        relation_id,
        namespace,
        name,
        replica_identity,
        columns,
    })
}

fn parse_tuple(cur: &mut Cursor<&[u8]>) -> PgResult<Vec<TupleValue>> {
    let count = read_count(cur)?;
    let mut values = Vec::with_capacity(count);

    for _ in 0..count {
        let value = match cur.read_u8()? {
            b'n' => TupleValue::Null,
            b'u' => TupleValue::Unchanged,
            b't' => TupleValue::Text(utf8(read_sized(cur)?, "column value")?),
            b'b' => TupleValue::Binary(read_sized(cur)?),
            kind => {
                return Err(PgError::PgOutput(format!(
                    "unknown tuple value kind 0x{kind:02X}"
                )))
            }
        };
        values.push(value);
    }

    Ok(values)
}

fn expect_marker(cur: &mut Cursor<&[u8]>, expected: u8, context: &str) -> PgResult<()> {
    let found = cur.read_u8()?;
    if found != expected {
        return Err(PgError::PgOutput(format!(
            "{context}: expected tuple marker '{}', got 0x{found:02X}",
            expected as char
        )));
    }
    Ok(())
}

fn read_count(cur: &mut Cursor<&[u8]>) -> PgResult<usize> {
    let n = cur.read_i16::<BigEndian>()?;
    usize::try_from(n).map_err(|_| PgError::PgOutput(format!("negative column count {n}")))
}

fn read_sized(cur: &mut Cursor<&[u8]>) -> PgResult<Vec<u8>> {
    let len = cur.read_i32::<BigEndian>()?;
    let len =
        usize::try_from(len).map_err(|_| PgError::PgOutput(format!("negative length {len}")))?;
    let remaining = cur.get_ref().len() - cur.position() as usize;
    if len > remaining {
        return Err(PgError::PgOutput(format!(
            "value length {len} exceeds remaining {remaining} bytes"
        )));
    }
    let mut buf = vec![0u8; len];
    cur.read_exact(&mut buf)?;
    Ok(buf)
}

/// Null-terminated string.
fn read_cstr(cur: &mut Cursor<&[u8]>) -> PgResult<String> {
    let mut bytes = Vec::new();
    loop {
        match cur.read_u8()? {
            0 => break,
            b => bytes.push(b),
        }
    }
    utf8(bytes, "identifier")
}

fn utf8(bytes: Vec<u8>, what: &str) -> PgResult<String> {
    String::from_utf8(bytes).map_err(|e| PgError::PgOutput(format!("{what} is not valid UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::wire;

    #[test]
    fn test_parse_begin_and_commit() {
        match parse_message(&wire::begin(0x200, 1_000_000, 77)).unwrap() {
            RawMessage::Begin(b) => {
                assert_eq!(b.final_lsn, 0x200);
                assert_eq!(b.commit_time, 1_000_000);
                assert_eq!(b.xid, 77);
            }
            other => panic!("expected Begin, got {other:?}"),
        }

        match parse_message(&wire::commit(0x200, 0x228, 1_000_000)).unwrap() {
            RawMessage::Commit(c) => {
                assert_eq!(c.commit_lsn, 0x200);
                assert_eq!(c.end_lsn, 0x228);
            }
            other => panic!("expected Commit, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_relation() {
        let data = wire::relation(16384, "public", "life_events", &[("id", 2950), ("name", 25)]);

        match parse_message(&data).unwrap() {
            RawMessage::Relation(r) => {
                assert_eq!(r.relation_id, 16384);
                assert_eq!(r.namespace, "public");
                assert_eq!(r.name, "life_events");
                assert_eq!(r.replica_identity, b'd');
                let names: Vec<&str> = r.columns.iter().map(|c| c.name.as_str()).collect();
                assert_eq!(names, vec!["id", "name"]);
                assert_eq!(r.columns[0].type_oid, 2950);
            }
            other => panic!("expected Relation, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_insert_value_kinds() {
        let data = wire::insert(16384, &[Some("Born"), None]);
        let mut with_toast = data.clone();
        // bump column count and append an unchanged marker
        with_toast[6..8].copy_from_slice(&3i16.to_be_bytes());
        with_toast.push(b'u');

        match parse_message(&with_toast).unwrap() {
            RawMessage::Insert(i) => {
                assert_eq!(i.relation_id, 16384);
                assert_eq!(
                    i.values,
                    vec![
                        TupleValue::Text("Born".into()),
                        TupleValue::Null,
                        TupleValue::Unchanged
                    ]
                );
            }
            other => panic!("expected Insert, got {other:?}"),
        }
    }

    #[test]
    fn test_update_delete_and_other_tags() {
        let mut update = vec![b'U'];
        update.extend_from_slice(&16384u32.to_be_bytes());
        update.push(b'N');
        assert_eq!(
            parse_message(&update).unwrap(),
            RawMessage::Update { relation_id: 16384 }
        );

        let mut delete = vec![b'D'];
        delete.extend_from_slice(&5u32.to_be_bytes());
        assert_eq!(
            parse_message(&delete).unwrap(),
            RawMessage::Delete { relation_id: 5 }
        );

        assert_eq!(parse_message(b"Yxyz").unwrap(), RawMessage::Other(b'Y'));
        assert_eq!(parse_message(b"Z").unwrap(), RawMessage::Unknown(b'Z'));
    }

    #[test]
    fn test_truncated_messages_are_errors() {
        assert!(parse_message(&[]).is_err());
        assert!(parse_message(&[b'B', 0, 0]).is_err());

        let mut insert = wire::insert(1, &[Some("Married")]);
        insert.truncate(insert.len() - 3);
        assert!(parse_message(&insert).is_err());
    }

    #[test]
    fn test_invalid_utf8_is_an_error() {
        let mut value = wire::insert(1, &[Some("ab")]);
        let last = value.len() - 1;
        value[last] = 0xFF;
        assert!(matches!(parse_message(&value), Err(PgError::PgOutput(m)) if m.contains("UTF-8")));

        let mut ident = wire::relation(1, "public", "ab", &[("id", 23)]);
        let pos = ident.windows(3).position(|w| w == b"ab\0").unwrap();
        ident[pos] = 0xC3;
        assert!(matches!(parse_message(&ident), Err(PgError::PgOutput(m)) if m.contains("identifier")));
    }

    #[test]
    fn test_insert_requires_new_tuple_marker() {
        let mut data = wire::insert(1, &[Some("Died")]);
        data[5] = b'K';
        assert!(matches!(parse_message(&data), Err(PgError::PgOutput(_))));
    }
}
