//! Scripted replication source and recording sink for tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use lifestream_core::{ChangeRecord, Sink};

use crate::error::{PgError, PgResult};
use crate::replication::transport::{ReplicationSession, ReplicationSource, WalMessage};

/// One step a mock session plays back from `recv`.
#[derive(Debug)]
pub enum ScriptStep {
    Message(WalMessage),
    Fail(PgError),
    /// The server ends the stream.
    End,
}

impl ScriptStep {
    /// A pgoutput payload ending at `wal_end`.
    pub fn data(wal_end: u64, payload: Vec<u8>) -> Self {
        ScriptStep::Message(WalMessage::Data {
            wal_end,
            data: Bytes::from(payload),
        })
    }

    pub fn keepalive(wal_end: u64) -> Self {
        ScriptStep::Message(WalMessage::KeepAlive {
            wal_end,
            reply_requested: false,
        })
    }
}

/// Outcome of one `open_session` call.
#[derive(Debug)]
pub enum ConnectOutcome {
    Session {
        start_lsn: u64,
        steps: Vec<ScriptStep>,
    },
    Fail(PgError),
}

/// Ordered record of what the loop did, shared by source and sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Delivered(u64),
    Acknowledged(u64),
}

#[derive(Default)]
struct MockState {
    provision_error: Option<PgError>,
    connects: VecDeque<ConnectOutcome>,
    provisions: usize,
    connect_attempts: usize,
    journal: Vec<JournalEntry>,
    records: Vec<ChangeRecord>,
}

/// A replication source that plays back scripted sessions.
///
/// Once the script runs out, `open_session` hands out sessions that never
/// produce a message.
#[derive(Clone, Default)]
pub struct MockSource {
    state: Arc<Mutex<MockState>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next connect attempt.
    pub fn push_connect(&self, outcome: ConnectOutcome) -> &Self {
        self.state.lock().unwrap().connects.push_back(outcome);
        self
    }

    /// Queue a session starting at `start_lsn`.
    pub fn push_session(&self, start_lsn: u64, steps: Vec<ScriptStep>) -> &Self {
        self.push_connect(ConnectOutcome::Session { start_lsn, steps })
    }

    /// Make the next provisioning attempt fail.
    pub fn fail_provision(&self, error: PgError) {
        self.state.lock().unwrap().provision_error = Some(error);
    }

    /// A sink that records into this source's journal.
    pub fn sink(&self) -> MockSink {
        MockSink {
            state: self.state.clone(),
        }
    }

    pub fn provisions(&self) -> usize {
        self.state.lock().unwrap().provisions
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.lock().unwrap().connect_attempts
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.state.lock().unwrap().journal.clone()
    }

    /// Every position acknowledged, in order.
    pub fn acknowledged(&self) -> Vec<u64> {
        self.journal()
            .into_iter()
            .filter_map(|entry| match entry {
                JournalEntry::Acknowledged(lsn) => Some(lsn),
                JournalEntry::Delivered(_) => None,
            })
            .collect()
    }

    /// Records delivered to the sink, in order.
    pub fn records(&self) -> Vec<ChangeRecord> {
        self.state.lock().unwrap().records.clone()
    }
}

impl ReplicationSource for MockSource {
    type Session = MockSession;

    async fn provision(&mut self) -> PgResult<()> {
        let mut state = self.state.lock().unwrap();
        state.provisions += 1;
        match state.provision_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn open_session(&mut self) -> PgResult<MockSession> {
        let outcome = {
            let mut state = self.state.lock().unwrap();
            state.connect_attempts += 1;
            state.connects.pop_front()
        };

        match outcome {
            Some(ConnectOutcome::Fail(e)) => Err(e),
            Some(ConnectOutcome::Session { start_lsn, steps }) => Ok(MockSession {
                start_lsn,
                steps: steps.into(),
                state: self.state.clone(),
            }),
            None => Ok(MockSession {
                start_lsn: 0,
                steps: VecDeque::new(),
                state: self.state.clone(),
            }),
        }
    }
}

pub struct MockSession {
    start_lsn: u64,
    steps: VecDeque<ScriptStep>,
    state: Arc<Mutex<MockState>>,
}

impl ReplicationSession for MockSession {
    fn start_lsn(&self) -> u64 {
        self.start_lsn
    }

    async fn recv(&mut self) -> PgResult<Option<WalMessage>> {
        match self.steps.pop_front() {
            Some(ScriptStep::Message(message)) => Ok(Some(message)),
            Some(ScriptStep::Fail(e)) => Err(e),
            Some(ScriptStep::End) => Ok(None),
            None => std::future::pending().await,
        }
    }

    fn acknowledge(&mut self, lsn: u64) {
        self.state
            .lock()
            .unwrap()
            .journal
            .push(JournalEntry::Acknowledged(lsn));
    }
}

/// Sink half of the mock: records deliveries into the shared journal.
#[derive(Clone)]
pub struct MockSink {
    state: Arc<Mutex<MockState>>,
}

impl Sink for MockSink {
    fn deliver(&mut self, record: ChangeRecord) {
        let mut state = self.state.lock().unwrap();
        state.journal.push(JournalEntry::Delivered(record.lsn));
        state.records.push(record);
    }
}

/// Builders for pgoutput payloads.
pub mod wire {
    fn cstr(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(s.as_bytes());
        buf.push(0);
    }

    pub fn begin(final_lsn: u64, commit_time: i64, xid: u32) -> Vec<u8> {
        let mut buf = vec![b'B'];
        buf.extend_from_slice(&final_lsn.to_be_bytes());
        buf.extend_from_slice(&commit_time.to_be_bytes());
        buf.extend_from_slice(&xid.to_be_bytes());
        buf
    }

    pub fn commit(commit_lsn: u64, end_lsn: u64, commit_time: i64) -> Vec<u8> {
        let mut buf = vec![b'C', 0];
        buf.extend_from_slice(&commit_lsn.to_be_bytes());
        buf.extend_from_slice(&end_lsn.to_be_bytes());
        buf.extend_from_slice(&commit_time.to_be_bytes());
        buf
    }

    /// Relation message with default replica identity; columns are `(name, type_oid)`.
    pub fn relation(relation_id: u32, namespace: &str, name: &str, columns: &[(&str, u32)]) -> Vec<u8> {
        let mut buf = vec![b'R'];
        buf.extend_from_slice(&relation_id.to_be_bytes());
        cstr(&mut buf, namespace);
        cstr(&mut buf, name);
        buf.push(b'd');
        buf.extend_from_slice(&(columns.len() as i16).to_be_bytes());
        for (i, (column, oid)) in columns.iter().enumerate() {
            // first column flagged as part of the key
            buf.push(u8::from(i == 0));
            cstr(&mut buf, column);
            buf.extend_from_slice(&oid.to_be_bytes());
            buf.extend_from_slice(&(-1i32).to_be_bytes());
        }
        buf
    }

    /// Insert with text-format values; `None` is SQL NULL.
    pub fn insert(relation_id: u32, values: &[Option<&str>]) -> Vec<u8> {
        let mut buf = vec![b'I'];
        buf.extend_from_slice(&relation_id.to_be_bytes());
        buf.push(b'N');
        buf.extend_from_slice(&(values.len() as i16).to_be_bytes());
        for value in values {
            match value {
                Some(text) => {
                    buf.push(b't');
                    buf.extend_from_slice(&(text.len() as i32).to_be_bytes());
                    buf.extend_from_slice(text.as_bytes());
                }
                None => buf.push(b'n'),
            }
        }
        buf
    }
}
