use std::time::{Duration, Instant};

use lifestream_core::Value;
use lifestream_pg::mock::{wire, ConnectOutcome, JournalEntry, MockSource, ScriptStep};
use lifestream_pg::replication::{WalMessage, DEFAULT_BACKOFF};
use lifestream_pg::{create_shutdown, LoopConfig, LoopStats, PgError, PgResult, ReplicationLoop, ShutdownTx};
use tokio::task::JoinHandle;

const REL: u32 = 16384;

fn relation() -> Vec<u8> {
    wire::relation(
        REL,
        "public",
        "life_events",
        &[("id", 2950), ("name", 25), ("positive", 16)],
    )
}

fn life_event(id: &str, name: &str) -> Vec<u8> {
    wire::insert(REL, &[Some(id), Some(name), Some("t")])
}

fn slot_busy() -> PgError {
    PgError::from_replication(
        "lifestream_slot",
        "db error: ERROR: replication slot \"lifestream_slot\" is active for PID 4242".into(),
    )
}

fn spawn_loop(source: &MockSource, backoff: Duration) -> (ShutdownTx, JoinHandle<PgResult<LoopStats>>) {
    let (tx, rx) = create_shutdown();
    let sink = source.sink();
    let source = source.clone();
    let handle = tokio::spawn(async move {
        let mut repl = ReplicationLoop::new(source, sink, LoopConfig { backoff }, rx);
        repl.run().await
    });
    (tx, handle)
}

async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Let spawned tasks run without moving the clock.
async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

async fn stop(tx: ShutdownTx, handle: JoinHandle<PgResult<LoopStats>>) -> LoopStats {
    tx.shutdown();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("loop should stop promptly")
        .expect("loop task panicked")
        .expect("loop should stop cleanly")
}

fn names(source: &MockSource) -> Vec<String> {
    source
        .records()
        .iter()
        .filter_map(|r| r.get("name").and_then(Value::as_str).map(String::from))
        .collect()
}

#[tokio::test]
async fn delivers_inserts_in_commit_order_and_acks_after_delivery() {
    let source = MockSource::new();
    source.push_session(
        0x80,
        vec![
            ScriptStep::data(0x90, relation()),
            ScriptStep::data(0x98, wire::begin(0x300, 1_000_000, 7)),
            ScriptStep::data(0x100, life_event("a", "Born")),
            ScriptStep::data(0x200, life_event("b", "Married")),
            ScriptStep::data(0x300, life_event("c", "Died")),
        ],
    );

    let (tx, handle) = spawn_loop(&source, Duration::from_millis(10));
    wait_until("three deliveries", || source.records().len() == 3).await;
    let stats = stop(tx, handle).await;

    assert_eq!(names(&source), vec!["Born", "Married", "Died"]);
    for record in source.records() {
        assert!(record.lsn > 0);
        assert_eq!(record.xid, Some(7));
        assert_eq!(
            record.committed_at.as_deref(),
            Some("2000-01-01T00:00:01.000000Z")
        );
    }
    assert_eq!(
        source.journal(),
        vec![
            JournalEntry::Acknowledged(0x90),
            JournalEntry::Acknowledged(0x98),
            JournalEntry::Delivered(0x100),
            JournalEntry::Acknowledged(0x100),
            JournalEntry::Delivered(0x200),
            JournalEntry::Acknowledged(0x200),
            JournalEntry::Delivered(0x300),
            JournalEntry::Acknowledged(0x300),
        ]
    );
    assert_eq!(stats.delivered, 3);
    assert_eq!(stats.last_acknowledged, 0x300);
    assert_eq!(source.provisions(), 1);
}

#[tokio::test(start_paused = true)]
async fn retries_after_backoff_when_slot_is_busy() {
    let source = MockSource::new();
    source
        .push_connect(ConnectOutcome::Fail(slot_busy()))
        .push_session(
            0,
            vec![
                ScriptStep::data(0x10, relation()),
                ScriptStep::data(0x20, life_event("a", "Born")),
            ],
        );

    let (tx, handle) = spawn_loop(&source, DEFAULT_BACKOFF);
    settle().await;
    assert_eq!(source.connect_attempts(), 1);

    // Still waiting halfway through the backoff
    tokio::time::advance(DEFAULT_BACKOFF / 2).await;
    settle().await;
    assert_eq!(source.connect_attempts(), 1);
    assert!(source.records().is_empty());

    tokio::time::advance(DEFAULT_BACKOFF / 2).await;
    wait_until("delivery after retry", || source.records().len() == 1).await;

    let stats = stop(tx, handle).await;
    assert_eq!(stats.reconnects, 1);
    assert_eq!(stats.sessions, 1);
    assert_eq!(source.connect_attempts(), 2);
    assert_eq!(source.provisions(), 1);
}

#[tokio::test]
async fn reconnects_when_slot_is_taken_mid_stream() {
    let source = MockSource::new();
    source
        .push_session(
            0,
            vec![
                ScriptStep::data(0x10, relation()),
                ScriptStep::data(0x20, life_event("a", "Born")),
                ScriptStep::Fail(slot_busy()),
            ],
        )
        // The new session must re-learn the schema
        .push_session(
            0x20,
            vec![
                ScriptStep::data(0x30, life_event("x", "Lost")),
                ScriptStep::data(0x40, relation()),
                ScriptStep::data(0x50, life_event("b", "Married")),
            ],
        );

    let (tx, handle) = spawn_loop(&source, Duration::from_millis(10));
    wait_until("delivery on second session", || source.records().len() == 2).await;
    let stats = stop(tx, handle).await;

    assert_eq!(names(&source), vec!["Born", "Married"]);
    assert_eq!(stats.sessions, 2);
    assert_eq!(stats.reconnects, 1);
    assert_eq!(stats.skipped, 1);
}

#[tokio::test]
async fn reconnects_when_server_ends_stream() {
    let source = MockSource::new();
    source
        .push_session(
            0,
            vec![
                ScriptStep::data(0x10, relation()),
                ScriptStep::data(0x20, life_event("a", "Born")),
                ScriptStep::End,
            ],
        )
        .push_session(
            0x20,
            vec![
                ScriptStep::data(0x30, relation()),
                ScriptStep::data(0x40, life_event("b", "Divorced")),
            ],
        );

    let (tx, handle) = spawn_loop(&source, Duration::from_millis(10));
    wait_until("delivery on second session", || source.records().len() == 2).await;
    let stats = stop(tx, handle).await;

    assert_eq!(names(&source), vec!["Born", "Divorced"]);
    assert_eq!(stats.reconnects, 1);
}

#[tokio::test]
async fn unrecognised_connect_fault_is_fatal() {
    let source = MockSource::new();
    source.push_connect(ConnectOutcome::Fail(PgError::Connection(
        "password authentication failed".into(),
    )));

    let (_tx, handle) = spawn_loop(&source, Duration::from_millis(10));
    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(result, Err(PgError::Connection(_))));
    assert_eq!(source.connect_attempts(), 1);
}

#[tokio::test]
async fn unrecognised_stream_fault_is_fatal() {
    let source = MockSource::new();
    source.push_session(
        0,
        vec![
            ScriptStep::data(0x10, relation()),
            ScriptStep::Fail(PgError::Replication("unexpected message".into())),
        ],
    );

    let (_tx, handle) = spawn_loop(&source, Duration::from_millis(10));
    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(result, Err(PgError::Replication(_))));
    assert_eq!(source.connect_attempts(), 1);
}

#[tokio::test]
async fn provisioning_failure_is_fatal() {
    let source = MockSource::new();
    source.fail_provision(PgError::PublicationCreationFailed("permission denied".into()));

    let (_tx, handle) = spawn_loop(&source, Duration::from_millis(10));
    let result = handle.await.unwrap();

    assert!(matches!(result, Err(PgError::PublicationCreationFailed(_))));
    assert_eq!(source.connect_attempts(), 0);
}

#[tokio::test]
async fn stops_while_waiting_for_messages() {
    let source = MockSource::new();
    source.push_session(0, vec![ScriptStep::keepalive(0x10)]);

    let (tx, handle) = spawn_loop(&source, Duration::from_millis(10));
    wait_until("session opened", || source.connect_attempts() == 1).await;
    let stats = stop(tx, handle).await;

    assert_eq!(stats.sessions, 1);
    assert_eq!(stats.delivered, 0);
    // keepalive positions are never acknowledged
    assert!(source.acknowledged().is_empty());
}

#[tokio::test]
async fn stops_during_backoff() {
    let source = MockSource::new();
    source.push_connect(ConnectOutcome::Fail(slot_busy()));

    let (tx, handle) = spawn_loop(&source, Duration::from_secs(3600));
    wait_until("first connect attempt", || source.connect_attempts() == 1).await;
    let stats = stop(tx, handle).await;

    assert_eq!(stats.reconnects, 0);
    assert_eq!(source.connect_attempts(), 1);
}

#[tokio::test]
async fn undecodable_messages_are_skipped() {
    let source = MockSource::new();
    source.push_session(
        0,
        vec![
            ScriptStep::data(0x10, life_event("a", "Born")),
            ScriptStep::data(0x20, vec![b'I', 0, 0]),
            ScriptStep::data(0x30, b"Zunknown".to_vec()),
            ScriptStep::data(0x40, relation()),
            ScriptStep::data(0x50, wire::insert(REL, &[Some("only one")])),
            ScriptStep::data(0x60, life_event("b", "Married")),
        ],
    );

    let (tx, handle) = spawn_loop(&source, Duration::from_millis(10));
    wait_until("delivery after anomalies", || source.records().len() == 1).await;
    let stats = stop(tx, handle).await;

    assert_eq!(names(&source), vec!["Married"]);
    assert_eq!(stats.skipped, 3);
    assert_eq!(stats.last_acknowledged, 0x60);
}

#[tokio::test]
async fn acknowledgements_never_move_backwards() {
    let source = MockSource::new();
    source.push_session(
        0x100,
        vec![
            ScriptStep::data(0x80, relation()),
            ScriptStep::data(0x200, life_event("a", "Born")),
            ScriptStep::data(0x180, life_event("b", "Married")),
            ScriptStep::keepalive(0x900),
            ScriptStep::Message(WalMessage::Commit { end_lsn: 0x300 }),
            ScriptStep::Message(WalMessage::Commit { end_lsn: 0x300 }),
        ],
    );

    let (tx, handle) = spawn_loop(&source, Duration::from_millis(10));
    wait_until("commit acknowledged", || source.acknowledged().contains(&0x300)).await;
    let stats = stop(tx, handle).await;

    assert_eq!(source.acknowledged(), vec![0x200, 0x300]);
    assert_eq!(stats.delivered, 2);
}

#[tokio::test]
async fn transport_transaction_boundaries_annotate_records() {
    let source = MockSource::new();
    source.push_session(
        0,
        vec![
            ScriptStep::data(0x10, relation()),
            ScriptStep::Message(WalMessage::Begin {
                xid: 901,
                commit_time_micros: 0,
            }),
            ScriptStep::data(0x20, life_event("a", "Born")),
            ScriptStep::Message(WalMessage::Commit { end_lsn: 0x28 }),
            ScriptStep::data(0x30, life_event("b", "Died")),
        ],
    );

    let (tx, handle) = spawn_loop(&source, Duration::from_millis(10));
    wait_until("two deliveries", || source.records().len() == 2).await;
    stop(tx, handle).await;

    let records = source.records();
    assert_eq!(records[0].xid, Some(901));
    assert_eq!(records[1].xid, None);
    assert_eq!(source.acknowledged(), vec![0x10, 0x20, 0x28, 0x30]);
}
