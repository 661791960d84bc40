//! PostgreSQL-backed replication source.
//!
//! Control-plane work (provisioning, reading the slot position) runs over a
//! regular tokio-postgres connection. Streaming uses pgwire-replication.

use std::time::Duration;

use pgwire_replication::{ReplicationClient, ReplicationConfig as PgwireConfig, ReplicationEvent};
use tokio_postgres::Client;
use tracing::{debug, info};

use super::lsn::{format_lsn, from_wire, parse_lsn, to_wire};
use super::publication::ensure_publication;
use super::slot::{confirmed_flush_lsn, ensure_slot};
use super::transport::{ReplicationSession, ReplicationSource, WalMessage};
use super::{DEFAULT_PUBLICATION, DEFAULT_SLOT, DEFAULT_TABLE, OUTPUT_PLUGIN};
use crate::connect::connect_postgres;
use crate::error::{PgError, PgResult};

/// Where and what to stream.
#[derive(Debug, Clone)]
pub struct ReplicationStreamConfig {
    /// Postgres connection string (URL or key/value form).
    pub connection_string: String,
    pub slot_name: String,
    pub publication_name: String,
    /// Watched table, `schema.table` or bare `table`.
    pub table: String,
    /// How often the transport reports its applied position to the server.
    pub status_interval: Duration,
}

impl Default for ReplicationStreamConfig {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            slot_name: DEFAULT_SLOT.to_string(),
            publication_name: DEFAULT_PUBLICATION.to_string(),
            table: DEFAULT_TABLE.to_string(),
            status_interval: Duration::from_secs(10),
        }
    }
}

/// Replication source talking to a live server.
pub struct PgReplicationSource {
    config: ReplicationStreamConfig,
    control: Option<Client>,
}

impl PgReplicationSource {
    pub fn new(config: ReplicationStreamConfig) -> Self {
        Self {
            config,
            control: None,
        }
    }

    pub fn config(&self) -> &ReplicationStreamConfig {
        &self.config
    }

    /// Control-plane client, reconnecting if the previous one closed.
    async fn control_client(&mut self) -> PgResult<&mut Client> {
        if self.control.as_ref().map_or(true, Client::is_closed) {
            self.control = Some(connect_postgres(&self.config.connection_string).await?);
        }
        self.control
            .as_mut()
            .ok_or_else(|| PgError::Connection("control connection unavailable".into()))
    }
}

impl ReplicationSource for PgReplicationSource {
    type Session = PgwireSession;

    async fn provision(&mut self) -> PgResult<()> {
        let publication = self.config.publication_name.clone();
        let slot = self.config.slot_name.clone();
        let table = self.config.table.clone();

        let client = self.control_client().await?;
        let created_publication = ensure_publication(client, &publication, &table).await?;
        let created_slot = ensure_slot(client, &slot, OUTPUT_PLUGIN).await?;

        info!(
            publication = %publication,
            slot = %slot,
            created_publication,
            created_slot,
            "Replication objects ready"
        );
        Ok(())
    }

    async fn open_session(&mut self) -> PgResult<PgwireSession> {
        let slot = self.config.slot_name.clone();

        let start_lsn = {
            let client = self.control_client().await?;
            match confirmed_flush_lsn(client, &slot).await? {
                Some(lsn) => parse_lsn(&lsn)?,
                None => 0,
            }
        };

        let params = ConnectionParams::parse(&self.config.connection_string)?;
        debug!(
            host = %params.host,
            port = params.port,
            user = %params.user,
            database = %params.database,
            sslmode = ?params.sslmode,
            "Parsed connection parameters"
        );

        let tls = match params.sslmode.as_deref() {
            Some("require") => pgwire_replication::TlsConfig::require(),
            Some("verify-ca") => pgwire_replication::TlsConfig::verify_ca(None),
            Some("verify-full") => pgwire_replication::TlsConfig::verify_full(None),
            _ => pgwire_replication::TlsConfig::disabled(),
        };

        let pgwire_config = PgwireConfig {
            host: params.host,
            port: params.port,
            user: params.user,
            password: params.password,
            database: params.database,
            slot: slot.clone(),
            publication: self.config.publication_name.clone(),
            start_lsn: to_wire(start_lsn),
            stop_at_lsn: None,
            status_interval: self.config.status_interval,
            idle_wakeup_interval: Duration::from_secs(10),
            buffer_events: 8192,
            tls,
        };

        info!(
            slot = %slot,
            publication = %self.config.publication_name,
            start_lsn = %format_lsn(start_lsn),
            "Opening replication session"
        );

        let client = ReplicationClient::connect(pgwire_config)
            .await
            .map_err(|e| PgError::from_replication(&slot, e.to_string()))?;

        Ok(PgwireSession {
            client,
            slot,
            start_lsn,
        })
    }
}

/// A live pgwire-replication stream.
pub struct PgwireSession {
    client: ReplicationClient,
    slot: String,
    start_lsn: u64,
}

impl ReplicationSession for PgwireSession {
    fn start_lsn(&self) -> u64 {
        self.start_lsn
    }

    async fn recv(&mut self) -> PgResult<Option<WalMessage>> {
        let event = self
            .client
            .recv()
            .await
            .map_err(|e| PgError::from_replication(&self.slot, e.to_string()))?;

        let Some(event) = event else {
            return Ok(None);
        };

        let message = match event {
            ReplicationEvent::XLogData { wal_end, data, .. } => WalMessage::Data {
                wal_end: from_wire(wal_end),
                data: data.into(),
            },
            ReplicationEvent::KeepAlive {
                wal_end,
                reply_requested,
                ..
            } => WalMessage::KeepAlive {
                wal_end: from_wire(wal_end),
                reply_requested,
            },
            // Depending on version, pgwire-replication reports Begin/Commit as
            // protocol events instead of XLogData payloads
            ReplicationEvent::Begin {
                xid,
                commit_time_micros,
                ..
            } => WalMessage::Begin {
                xid,
                commit_time_micros,
            },
            ReplicationEvent::Commit { end_lsn, .. } => WalMessage::Commit {
                end_lsn: from_wire(end_lsn),
            },
            ReplicationEvent::StoppedAt { reached } => {
                info!(lsn = %format_lsn(from_wire(reached)), "Replication stream stopped");
                return Ok(None);
            }
        };

        Ok(Some(message))
    }

    fn acknowledge(&mut self, lsn: u64) {
        self.client.update_applied_lsn(to_wire(lsn));
    }
}

#[derive(Debug, PartialEq)]
struct ConnectionParams {
    host: String,
    port: u16,
    user: String,
    password: String,
    database: String,
    sslmode: Option<String>,
}

impl ConnectionParams {
    /// Accepts both `postgres://` URLs and `key=value` strings.
    fn parse(conn_str: &str) -> PgResult<Self> {
        if conn_str.starts_with("postgres://") || conn_str.starts_with("postgresql://") {
            Self::parse_url(conn_str)
        } else {
            Self::parse_keyvalue(conn_str)
        }
    }

    fn parse_url(conn_str: &str) -> PgResult<Self> {
        let url = url::Url::parse(conn_str)
            .map_err(|e| PgError::Connection(format!("Invalid connection URL: {}", e)))?;

        // Credentials may be percent-encoded
        let decode = |s: &str| {
            percent_encoding::percent_decode_str(s)
                .decode_utf8()
                .map(|d| d.into_owned())
                .unwrap_or_else(|_| s.to_string())
        };

        let database = match url.path().trim_start_matches('/') {
            "" => "postgres".to_string(),
            db => decode(db),
        };

        Ok(Self {
            host: url.host_str().unwrap_or("localhost").to_string(),
            port: url.port().unwrap_or(5432),
            user: decode(url.username()),
            password: url.password().map(decode).unwrap_or_default(),
            database,
            sslmode: url
                .query_pairs()
                .find(|(k, _)| k == "sslmode")
                .map(|(_, v)| v.into_owned()),
        })
    }

    fn parse_keyvalue(conn_str: &str) -> PgResult<Self> {
        let mut params = Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "postgres".to_string(),
            sslmode: None,
        };

        // Also accepts the `Host=...;Port=...` form with semicolons
        for part in conn_str.split(|c: char| c == ';' || c.is_whitespace()) {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            match key.to_ascii_lowercase().as_str() {
                "host" => params.host = value.to_string(),
                "port" => {
                    params.port = value
                        .parse()
                        .map_err(|_| PgError::Connection(format!("Invalid port: {value}")))?
                }
                "user" | "username" => params.user = value.to_string(),
                "password" => params.password = value.to_string(),
                "dbname" | "database" => params.database = value.to_string(),
                "sslmode" => params.sslmode = Some(value.to_string()),
                _ => {}
            }
        }

        Ok(params)
    }
}
