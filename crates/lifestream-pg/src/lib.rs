mod connect;
mod error;
pub mod generator;
pub mod mock;
pub mod replication;
pub mod shutdown;

pub use connect::connect_postgres;
pub use error::{PgError, PgResult, SQLSTATE_DUPLICATE_OBJECT, SQLSTATE_OBJECT_IN_USE};
pub use generator::{ensure_life_events_table, insert_life_event, GeneratorConfig, RowGenerator};
pub use replication::{
    check_replication_setup, format_lsn, parse_lsn, LoopConfig, LoopStats, PgReplicationSource,
    ReplicationLoop, ReplicationStatus, ReplicationStreamConfig, DEFAULT_PUBLICATION, DEFAULT_SLOT,
    DEFAULT_TABLE,
};
pub use shutdown::{create_shutdown, ShutdownRx, ShutdownTx};
